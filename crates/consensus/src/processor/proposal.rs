use std::sync::Arc;

use tbft_consensus_core::crypto::Aggregator;
use tbft_consensus_core::msg::{ConsensusMessage as _, Proposal, VoteForSignature, VoteKind};
use tbft_consensus_core::signed::Signable as _;
use tbft_util_error::fmt::FmtCompact as _;
use tracing::{Level, debug, instrument, warn};

use super::{LOG_TARGET, ProcessResult, ProcessorCtx, ProcessorResult};
use crate::commit_lock::CommitLock;
use crate::proposer::ProposerSelector;
use crate::round_state::InsertOutcome;

pub struct ProposalProcessor {
    ctx: ProcessorCtx,
    proposer_selector: Arc<dyn ProposerSelector>,
    aggregator: Arc<dyn Aggregator>,
    commit_lock: Arc<CommitLock>,
}

#[bon::bon]
impl ProposalProcessor {
    #[builder]
    pub fn new(
        ctx: ProcessorCtx,
        proposer_selector: Arc<dyn ProposerSelector>,
        aggregator: Arc<dyn Aggregator>,
        commit_lock: Arc<CommitLock>,
    ) -> Self {
        Self {
            ctx,
            proposer_selector,
            aggregator,
            commit_lock,
        }
    }
}

impl ProposalProcessor {
    /// Process a proposal received in wire encoding
    #[instrument(
        name = "process_proposal",
        skip_all,
        fields(len = data.len(), broadcast = broadcast),
        ret(level = Level::DEBUG),
        err
    )]
    pub async fn process(&self, data: &[u8], broadcast: bool) -> ProcessResult {
        self.commit_lock
            .run_non_exclusive(async {
                let proposal = match self.ctx.message_factory.make_proposal_from_bytes(data) {
                    Ok(proposal) => proposal,
                    Err(err) => {
                        debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Malformed proposal");
                        return Ok(ProcessorResult::Invalid);
                    }
                };

                self.process_locked(proposal, broadcast).await
            })
            .await
    }

    /// Process an already decoded proposal, e.g. one made locally
    pub async fn process_proposal(&self, proposal: Proposal, broadcast: bool) -> ProcessResult {
        self.commit_lock
            .run_non_exclusive(self.process_locked(proposal, broadcast))
            .await
    }

    async fn process_locked(&self, proposal: Proposal, broadcast: bool) -> ProcessResult {
        if !self.ctx.has_valid_height_or_round(&proposal) {
            return ProcessorCtx::skipped(&proposal, "not for the current height and round");
        }

        if !self.is_round_in_bounds(&proposal) {
            return ProcessorCtx::invalid(&proposal, "round too far ahead");
        }

        if !self.has_valid_proposer(&proposal) {
            return ProcessorCtx::invalid(&proposal, "not the proposer of the round");
        }

        if !self.ctx.has_valid_signature(&proposal).await {
            return ProcessorCtx::invalid(&proposal, "invalid signature");
        }

        if !self.has_valid_block_generator(&proposal) {
            return ProcessorCtx::invalid(&proposal, "block not generated by the proposer");
        }

        if !self.has_valid_lock_proof(&proposal).await {
            return ProcessorCtx::invalid(&proposal, "invalid lock proof");
        }

        let round_state = self
            .ctx
            .round_states
            .get_round_state(proposal.height(), proposal.round());

        if let InsertOutcome::AlreadyPresent(_) = round_state.add_proposal(proposal.clone()) {
            return ProcessorCtx::skipped(&proposal, "round already has a proposal");
        }

        if let Err(err) = self.ctx.storage.save_proposal(&proposal).await {
            round_state.remove_proposal();
            warn!(
                target: LOG_TARGET,
                height = %proposal.height(),
                round = %proposal.round(),
                validator_idx = %proposal.validator_index(),
                err = %err.fmt_compact(),
                "Failed to persist proposal"
            );
            return Err(err);
        }

        debug!(
            target: LOG_TARGET,
            height = %proposal.height(),
            round = %proposal.round(),
            validator_idx = %proposal.validator_index(),
            block_id = %proposal.block().id(),
            "Accepted proposal"
        );

        if broadcast {
            let broadcaster = self.ctx.broadcaster.clone();
            self.ctx.spawn_broadcast("proposal", async move {
                broadcaster.broadcast_proposal(&proposal).await
            });
        }
        self.ctx.spawn_consensus_handle(round_state);

        Ok(ProcessorResult::Accepted)
    }

    fn is_round_in_bounds(&self, proposal: &Proposal) -> bool {
        proposal.round()
            <= self
                .ctx
                .config
                .max_proposal_round(self.ctx.consensus.get_round())
    }

    fn has_valid_proposer(&self, proposal: &Proposal) -> bool {
        proposal.validator_index() == self.proposer_selector.get_validator_index(proposal.round())
    }

    /// A fresh block must be generated by the proposer itself
    ///
    /// Re-proposed blocks were checked when first proposed, possibly by
    /// another validator, so they are let through.
    fn has_valid_block_generator(&self, proposal: &Proposal) -> bool {
        if proposal.valid_round().is_some() {
            return true;
        }

        let proposer_idx = self.proposer_selector.get_validator_index(proposal.round());
        let Some(proposer) = self.ctx.validator_set.get_validator(proposer_idx) else {
            return false;
        };

        proposal.block().header.generator_public_key == proposer.wallet_public_key()
    }

    async fn has_valid_lock_proof(&self, proposal: &Proposal) -> bool {
        let Some(valid_round) = proposal.valid_round() else {
            return true;
        };

        if proposal.round() <= valid_round {
            debug!(
                target: LOG_TARGET,
                height = %proposal.height(),
                round = %proposal.round(),
                %valid_round,
                "Proposal valid round not below its round"
            );
            return false;
        }

        // The lock proof can arrive separately from the re-proposal
        let Some(lock_proof) = proposal.lock_proof() else {
            debug!(
                target: LOG_TARGET,
                height = %proposal.height(),
                round = %proposal.round(),
                "Proposal with missing lock proof"
            );
            return true;
        };

        let signed_payload = VoteForSignature {
            kind: VoteKind::Prevote,
            height: proposal.height(),
            round: valid_round,
            block_id: Some(proposal.block().id()),
        }
        .signing_payload();

        self.aggregator
            .verify(
                lock_proof,
                &signed_payload,
                self.ctx.config.active_validators(proposal.height()),
            )
            .await
    }
}
