//! Collaborators and messages used throughout the unit tests
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tbft_consensus_core::block::{Block, BlockId};
use tbft_consensus_core::crypto::{AggregatedSignature, Ed25519Verifier, MultiSigAggregator};
use tbft_consensus_core::factory::WireMessageFactory;
use tbft_consensus_core::height::{Height, Round};
use tbft_consensus_core::msg::{
    Precommit, Prevote, Proposal, ProposalData, VoteData, VoteForSignature, VoteKind,
};
use tbft_consensus_core::num_validators::NumValidators;
use tbft_consensus_core::signed::Signable as _;
use tbft_consensus_core::validator::{
    ConsensusSeckey, StaticValidatorSet, Validator, ValidatorIdx, WalletPublicKey,
};
use tbft_consensus_storage::ConsensusStorage;
use tbft_db::Database;
use tbft_util_error::BoxedErrorResult;

use crate::commit_lock::CommitLock;
use crate::config::{ConsensusConfig, Milestone};
use crate::processor::{PrecommitProcessor, PrevoteProcessor, ProcessorCtx, ProposalProcessor};
use crate::proposer::ProposerSelector;
use crate::round_state::{RoundState, RoundStateRepository};
use crate::service::{Broadcaster, ConsensusService};

/// Proposer of round `r` is validator `r mod n`
pub struct RoundRobinProposer(pub u32);

impl ProposerSelector for RoundRobinProposer {
    fn get_validator_index(&self, round: Round) -> ValidatorIdx {
        ValidatorIdx::new(round.to_number() % self.0)
    }
}

pub struct MockConsensus {
    height: Height,
    round: AtomicU32,
    pub handled: Mutex<Vec<(Height, Round)>>,
}

impl MockConsensus {
    pub fn set_round(&self, round: u32) {
        self.round.store(round, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConsensusService for MockConsensus {
    fn get_height(&self) -> Height {
        self.height
    }

    fn get_round(&self) -> Round {
        Round::new(self.round.load(Ordering::SeqCst))
    }

    async fn handle(&self, round_state: Arc<RoundState>) -> BoxedErrorResult<()> {
        self.handled
            .lock()
            .expect("Locking failed")
            .push((round_state.height(), round_state.round()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBroadcaster {
    pub proposals: Mutex<Vec<Proposal>>,
    pub prevotes: Mutex<Vec<Prevote>>,
    pub precommits: Mutex<Vec<Precommit>>,
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn broadcast_proposal(&self, proposal: &Proposal) -> BoxedErrorResult<()> {
        self.proposals
            .lock()
            .expect("Locking failed")
            .push(proposal.clone());
        Ok(())
    }

    async fn broadcast_prevote(&self, prevote: &Prevote) -> BoxedErrorResult<()> {
        self.prevotes
            .lock()
            .expect("Locking failed")
            .push(prevote.clone());
        Ok(())
    }

    async fn broadcast_precommit(&self, _precommit: &Precommit) -> BoxedErrorResult<()> {
        Err("peers unreachable".into())
    }
}

pub struct Fixture {
    pub height: Height,
    pub seckeys: Vec<ConsensusSeckey>,
    pub validators: Vec<Validator>,
    pub validator_set: Arc<StaticValidatorSet>,
    pub config: Arc<ConsensusConfig>,
    pub consensus: Arc<MockConsensus>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub round_states: Arc<RoundStateRepository>,
    pub storage: Arc<ConsensusStorage>,
    pub commit_lock: Arc<CommitLock>,
    pub proposal_processor: ProposalProcessor,
    pub prevote_processor: PrevoteProcessor,
    pub precommit_processor: PrecommitProcessor,
}

impl Fixture {
    pub async fn new(num_validators: u32, height: u64) -> BoxedErrorResult<Self> {
        Self::with_db(num_validators, height, Arc::new(Database::new_in_memory().await?)).await
    }

    pub async fn with_db(
        num_validators: u32,
        height: u64,
        db: Arc<Database>,
    ) -> BoxedErrorResult<Self> {
        Self::build(num_validators, height, db, true).await
    }

    /// Storage that knows no validators, so every save fails
    pub async fn with_failing_storage(num_validators: u32, height: u64) -> BoxedErrorResult<Self> {
        Self::build(
            num_validators,
            height,
            Arc::new(Database::new_in_memory().await?),
            false,
        )
        .await
    }

    async fn build(
        num_validators: u32,
        height: u64,
        db: Arc<Database>,
        storage_knows_validators: bool,
    ) -> BoxedErrorResult<Self> {
        let height = Height::new(height);
        let seckeys: Vec<_> = (0..num_validators)
            .map(|_| ConsensusSeckey::generate())
            .collect();
        let validators: Vec<_> = seckeys
            .iter()
            .map(|seckey| Validator {
                consensus_public_key: seckey.pubkey(),
                wallet_public_key: WalletPublicKey::random(),
            })
            .collect();
        let validator_set = Arc::new(StaticValidatorSet::new(validators.clone()));

        let config = Arc::new(
            ConsensusConfig::builder()
                .max_rounds_ahead(10)
                .milestones(vec![Milestone {
                    height: Height::ZERO,
                    active_validators: NumValidators::new(num_validators),
                }])
                .build()?,
        );
        let proposer_selector = Arc::new(RoundRobinProposer(num_validators));
        let consensus = Arc::new(MockConsensus {
            height,
            round: AtomicU32::new(0),
            handled: Mutex::default(),
        });
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let round_states = Arc::new(RoundStateRepository::new(
            config.clone(),
            proposer_selector.clone(),
        ));
        let storage_validator_set = if storage_knows_validators {
            validator_set.clone()
        } else {
            Arc::new(StaticValidatorSet::new(vec![]))
        };
        let storage = Arc::new(
            ConsensusStorage::open(db, storage_validator_set, Arc::new(WireMessageFactory))
                .await?,
        );
        let commit_lock = Arc::new(CommitLock::new());

        let ctx = ProcessorCtx::builder()
            .config(config.clone())
            .validator_set(validator_set.clone())
            .verifier(Arc::new(Ed25519Verifier))
            .message_factory(Arc::new(WireMessageFactory))
            .round_states(round_states.clone())
            .storage(storage.clone())
            .broadcaster(broadcaster.clone())
            .consensus(consensus.clone())
            .build();

        Ok(Self {
            height,
            seckeys,
            validators,
            validator_set: validator_set.clone(),
            config,
            consensus,
            broadcaster,
            round_states,
            storage,
            commit_lock: commit_lock.clone(),
            proposal_processor: ProposalProcessor::builder()
                .ctx(ctx.clone())
                .proposer_selector(proposer_selector)
                .aggregator(Arc::new(MultiSigAggregator::new(validator_set)))
                .commit_lock(commit_lock)
                .build(),
            prevote_processor: PrevoteProcessor::new(ctx.clone()),
            precommit_processor: PrecommitProcessor::new(ctx),
        })
    }

    pub fn seckey(&self, idx: u32) -> ConsensusSeckey {
        self.seckeys[ValidatorIdx::new(idx).as_usize()]
    }

    pub fn block(&self, generator: u32, payload: &[u8]) -> Block {
        Block::new(
            self.height,
            BlockId::ZERO,
            self.validators[ValidatorIdx::new(generator).as_usize()].wallet_public_key,
            1_700_000_000_000,
            payload.to_vec(),
        )
    }

    pub fn proposal_with(
        &self,
        idx: u32,
        round: u32,
        block: Block,
        valid_round: Option<u32>,
        lock_proof: Option<AggregatedSignature>,
    ) -> Proposal {
        Proposal::new_signed(
            ProposalData {
                height: self.height,
                round: Round::new(round),
                validator_index: ValidatorIdx::new(idx),
                block,
                valid_round: valid_round.map(Round::new),
                lock_proof,
            },
            self.seckey(idx),
        )
    }

    /// Fresh proposal of the round's proposer
    pub fn proposal(&self, round: u32) -> Proposal {
        let proposer = round % u32::try_from(self.seckeys.len()).expect("Can't fail");
        self.proposal_with(proposer, round, self.block(proposer, b"txs"), None, None)
    }

    pub fn vote_data(&self, idx: u32, round: u32, block_id: Option<BlockId>) -> VoteData {
        VoteData {
            height: self.height,
            round: Round::new(round),
            validator_index: ValidatorIdx::new(idx),
            block_id,
        }
    }

    pub fn prevote(&self, idx: u32, round: u32, block_id: Option<BlockId>) -> Prevote {
        Prevote::new_signed(self.vote_data(idx, round, block_id), self.seckey(idx))
    }

    pub fn precommit(&self, idx: u32, round: u32, block_id: Option<BlockId>) -> Precommit {
        Precommit::new_signed(self.vote_data(idx, round, block_id), self.seckey(idx))
    }

    /// Lock proof of `signers` prevoting `block_id` at `round`
    pub fn lock_proof(&self, round: u32, block_id: BlockId, signers: &[u32]) -> AggregatedSignature {
        let payload = VoteForSignature {
            kind: VoteKind::Prevote,
            height: self.height,
            round: Round::new(round),
            block_id: Some(block_id),
        }
        .signing_payload();

        MultiSigAggregator::aggregate(
            &payload,
            signers
                .iter()
                .map(|idx| (ValidatorIdx::new(*idx), self.seckey(*idx))),
        )
    }
}

/// Wait for a condition set by a background task
pub async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not met in time");
}
