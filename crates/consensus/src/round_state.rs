//! In-memory accumulation of consensus messages, per height and round
use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};

use tbft_consensus_core::block::BlockId;
use tbft_consensus_core::crypto::AggregatedSignature;
use tbft_consensus_core::height::{Height, Round};
use tbft_consensus_core::msg::{ConsensusMessage, Precommit, Prevote, Proposal};
use tbft_consensus_core::num_validators::NumValidators;
use tbft_consensus_core::signer_set::SignerSet;
use tbft_consensus_core::validator::ValidatorIdx;
use tracing::trace;

use crate::config::ConsensusConfig;
use crate::proposer::ProposerSelector;

const LOG_TARGET: &str = "tbft::consensus::round_state";

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Inserted,
    AlreadyPresent(T),
}

impl<T> InsertOutcome<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

#[derive(Default)]
struct RoundStateInner {
    proposal: Option<Proposal>,
    prevotes: BTreeMap<ValidatorIdx, Prevote>,
    precommits: BTreeMap<ValidatorIdx, Precommit>,
}

/// Messages received for a single `(height, round)`
///
/// At most one proposal, and at most one prevote and one precommit per
/// validator. The `add_*` methods check and insert atomically, so two
/// concurrent adds for the same slot can't both succeed.
pub struct RoundState {
    height: Height,
    round: Round,
    proposer: ValidatorIdx,
    active_validators: NumValidators,
    inner: Mutex<RoundStateInner>,
}

impl RoundState {
    pub fn new(
        height: Height,
        round: Round,
        proposer: ValidatorIdx,
        active_validators: NumValidators,
    ) -> Self {
        Self {
            height,
            round,
            proposer,
            active_validators,
            inner: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoundStateInner> {
        self.inner.lock().expect("Locking failed")
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Validator expected to propose in this round
    pub fn proposer(&self) -> ValidatorIdx {
        self.proposer
    }

    pub fn active_validators(&self) -> NumValidators {
        self.active_validators
    }

    pub fn has_proposal(&self) -> bool {
        self.lock().proposal.is_some()
    }

    pub fn get_proposal(&self) -> Option<Proposal> {
        self.lock().proposal.clone()
    }

    pub fn add_proposal(&self, proposal: Proposal) -> InsertOutcome<Proposal> {
        debug_assert_eq!(proposal.height(), self.height);
        debug_assert_eq!(proposal.round(), self.round);

        let mut inner = self.lock();
        if let Some(existing) = &inner.proposal {
            return InsertOutcome::AlreadyPresent(existing.clone());
        }
        inner.proposal = Some(proposal);
        InsertOutcome::Inserted
    }

    /// Drop the proposal, undoing an add that could not be persisted
    pub fn remove_proposal(&self) -> Option<Proposal> {
        self.lock().proposal.take()
    }

    pub fn has_prevote(&self, validator_idx: ValidatorIdx) -> bool {
        self.lock().prevotes.contains_key(&validator_idx)
    }

    pub fn get_prevote(&self, validator_idx: ValidatorIdx) -> Option<Prevote> {
        self.lock().prevotes.get(&validator_idx).cloned()
    }

    pub fn get_prevotes(&self) -> Vec<Prevote> {
        self.lock().prevotes.values().cloned().collect()
    }

    pub fn add_prevote(&self, prevote: Prevote) -> InsertOutcome<Prevote> {
        debug_assert_eq!(prevote.height(), self.height);
        debug_assert_eq!(prevote.round(), self.round);

        Self::insert_vote(&mut self.lock().prevotes, prevote)
    }

    /// Drop the prevote of `validator_idx`, undoing an add that could not be persisted
    pub fn remove_prevote(&self, validator_idx: ValidatorIdx) -> Option<Prevote> {
        self.lock().prevotes.remove(&validator_idx)
    }

    pub fn has_precommit(&self, validator_idx: ValidatorIdx) -> bool {
        self.lock().precommits.contains_key(&validator_idx)
    }

    pub fn get_precommit(&self, validator_idx: ValidatorIdx) -> Option<Precommit> {
        self.lock().precommits.get(&validator_idx).cloned()
    }

    pub fn get_precommits(&self) -> Vec<Precommit> {
        self.lock().precommits.values().cloned().collect()
    }

    pub fn add_precommit(&self, precommit: Precommit) -> InsertOutcome<Precommit> {
        debug_assert_eq!(precommit.height(), self.height);
        debug_assert_eq!(precommit.round(), self.round);

        Self::insert_vote(&mut self.lock().precommits, precommit)
    }

    /// Drop the precommit of `validator_idx`, undoing an add that could not be persisted
    pub fn remove_precommit(&self, validator_idx: ValidatorIdx) -> Option<Precommit> {
        self.lock().precommits.remove(&validator_idx)
    }

    fn insert_vote<V: ConsensusMessage>(
        votes: &mut BTreeMap<ValidatorIdx, V>,
        vote: V,
    ) -> InsertOutcome<V> {
        match votes.entry(vote.validator_index()) {
            Entry::Occupied(existing) => InsertOutcome::AlreadyPresent(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(vote);
                InsertOutcome::Inserted
            }
        }
    }

    pub fn prevotes_count(&self) -> usize {
        self.lock().prevotes.len()
    }

    pub fn precommits_count(&self) -> usize {
        self.lock().precommits.len()
    }

    /// Validators that prevoted in this round
    pub fn validators_signed_prevote(&self) -> SignerSet {
        self.lock().prevotes.keys().copied().collect()
    }

    /// Validators that precommitted in this round
    pub fn validators_signed_precommit(&self) -> SignerSet {
        self.lock().precommits.keys().copied().collect()
    }

    /// Quorum prevoted for the block of the proposal
    pub fn has_majority_prevotes(&self) -> bool {
        let inner = self.lock();
        let Some(block_id) = inner.proposal.as_ref().map(|p| p.block().id()) else {
            return false;
        };
        self.is_majority(count_for(
            inner.prevotes.values().map(Prevote::block_id),
            Some(block_id),
        ))
    }

    /// Quorum prevoted for anything, nil included
    pub fn has_majority_prevotes_any(&self) -> bool {
        self.is_majority(self.prevotes_count())
    }

    /// Quorum prevoted nil
    pub fn has_majority_prevotes_null(&self) -> bool {
        let inner = self.lock();
        self.is_majority(count_for(inner.prevotes.values().map(Prevote::block_id), None))
    }

    /// Quorum precommitted for the block of the proposal
    pub fn has_majority_precommits(&self) -> bool {
        let inner = self.lock();
        let Some(block_id) = inner.proposal.as_ref().map(|p| p.block().id()) else {
            return false;
        };
        self.is_majority(count_for(
            inner.precommits.values().map(Precommit::block_id),
            Some(block_id),
        ))
    }

    /// Quorum precommitted for anything, nil included
    pub fn has_majority_precommits_any(&self) -> bool {
        self.is_majority(self.precommits_count())
    }

    /// Enough validators to include an honest one sent a vote of any kind
    pub fn has_minority_prevotes_or_precommits(&self) -> bool {
        let inner = self.lock();
        let signed: BTreeSet<_> = inner
            .prevotes
            .keys()
            .chain(inner.precommits.keys())
            .collect();

        self.active_validators.minority() <= signed.len()
    }

    /// Aggregate the quorum of prevotes for the proposal's block into a lock
    /// proof, if there's one
    pub fn prevotes_lock_proof(&self) -> Option<AggregatedSignature> {
        let inner = self.lock();
        let block_id = inner.proposal.as_ref()?.block().id();

        let votes: Vec<_> = inner
            .prevotes
            .iter()
            .filter(|(_, prevote)| prevote.block_id() == Some(block_id))
            .collect();

        if !self.is_majority(votes.len()) {
            return None;
        }

        Some(AggregatedSignature {
            signers: votes.iter().map(|(idx, _)| **idx).collect(),
            signatures: votes
                .iter()
                .map(|(_, prevote)| prevote.signature().clone())
                .collect(),
        })
    }

    fn is_majority(&self, count: usize) -> bool {
        self.active_validators.threshold() <= count
    }
}

fn count_for(
    block_ids: impl Iterator<Item = Option<BlockId>>,
    block_id: Option<BlockId>,
) -> usize {
    block_ids.filter(|id| *id == block_id).count()
}

/// All the [`RoundState`]s of the heights in flight
pub struct RoundStateRepository {
    config: Arc<ConsensusConfig>,
    proposer_selector: Arc<dyn ProposerSelector>,
    round_states: Mutex<BTreeMap<(Height, Round), Arc<RoundState>>>,
}

impl RoundStateRepository {
    pub fn new(config: Arc<ConsensusConfig>, proposer_selector: Arc<dyn ProposerSelector>) -> Self {
        Self {
            config,
            proposer_selector,
            round_states: Mutex::default(),
        }
    }

    /// Get the round state for `(height, round)`, creating an empty one if
    /// needed
    pub fn get_round_state(&self, height: Height, round: Round) -> Arc<RoundState> {
        let mut round_states = self.round_states.lock().expect("Locking failed");

        round_states
            .entry((height, round))
            .or_insert_with(|| {
                trace!(target: LOG_TARGET, %height, %round, "New round state");
                Arc::new(RoundState::new(
                    height,
                    round,
                    self.proposer_selector.get_validator_index(round),
                    self.config.active_validators(height),
                ))
            })
            .clone()
    }

    /// Round states of `height` created so far, by round
    pub fn round_states(&self, height: Height) -> Vec<Arc<RoundState>> {
        self.round_states
            .lock()
            .expect("Locking failed")
            .range((height, Round::ZERO)..=(height, Round::new(u32::MAX)))
            .map(|(_, round_state)| round_state.clone())
            .collect()
    }

    /// Drop all the round states
    pub fn clear(&self) {
        self.round_states.lock().expect("Locking failed").clear();
    }
}
