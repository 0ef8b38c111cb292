//! Validation pipelines of inbound consensus messages
//!
//! Every processor turns wire bytes into a [`ProcessorResult`]:
//!
//! * [`ProcessorResult::Skipped`] for stale or already known messages,
//! * [`ProcessorResult::Invalid`] for malformed messages and ones breaking
//!   the protocol rules,
//! * [`ProcessorResult::Accepted`] otherwise, after the message was added
//!   to its [`RoundState`] and persisted.
//!
//! Validation failures are never errors. The only error is a storage
//! failure, after which the height can't make progress safely.
mod proposal;
mod vote;

use std::future::Future;
use std::sync::Arc;

use derive_more::Display;
pub use proposal::ProposalProcessor;
use tbft_consensus_core::crypto::SignatureVerifier;
use tbft_consensus_core::factory::MessageFactory;
use tbft_consensus_core::msg::ConsensusMessage;
use tbft_consensus_core::validator::ValidatorSet;
use tbft_consensus_storage::{ConsensusStorage, ConsensusStorageError};
use tbft_util_error::BoxedErrorResult;
use tbft_util_error::fmt::FmtCompact as _;
use tracing::{debug, trace, warn};
pub use vote::{PrecommitProcessor, PrevoteProcessor, ProcessableVote, VoteProcessor};

use crate::config::ConsensusConfig;
use crate::round_state::{RoundState, RoundStateRepository};
use crate::service::{Broadcaster, ConsensusService};

const LOG_TARGET: &str = "tbft::consensus::processor";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorResult {
    Accepted,
    Skipped,
    Invalid,
}

pub type ProcessResult = Result<ProcessorResult, ConsensusStorageError>;

/// Collaborators shared by all the processors
#[derive(Clone)]
pub struct ProcessorCtx {
    config: Arc<ConsensusConfig>,
    validator_set: Arc<dyn ValidatorSet>,
    verifier: Arc<dyn SignatureVerifier>,
    message_factory: Arc<dyn MessageFactory>,
    round_states: Arc<RoundStateRepository>,
    storage: Arc<ConsensusStorage>,
    broadcaster: Arc<dyn Broadcaster>,
    consensus: Arc<dyn ConsensusService>,
}

#[bon::bon]
impl ProcessorCtx {
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ConsensusConfig>,
        validator_set: Arc<dyn ValidatorSet>,
        verifier: Arc<dyn SignatureVerifier>,
        message_factory: Arc<dyn MessageFactory>,
        round_states: Arc<RoundStateRepository>,
        storage: Arc<ConsensusStorage>,
        broadcaster: Arc<dyn Broadcaster>,
        consensus: Arc<dyn ConsensusService>,
    ) -> Self {
        Self {
            config,
            validator_set,
            verifier,
            message_factory,
            round_states,
            storage,
            broadcaster,
            consensus,
        }
    }
}

impl ProcessorCtx {
    pub fn round_states(&self) -> &Arc<RoundStateRepository> {
        &self.round_states
    }

    pub fn storage(&self) -> &Arc<ConsensusStorage> {
        &self.storage
    }

    /// Is `msg` for the current height, and not for a past round
    fn has_valid_height_or_round(&self, msg: &impl ConsensusMessage) -> bool {
        msg.height() == self.consensus.get_height() && self.consensus.get_round() <= msg.round()
    }

    async fn has_valid_signature(&self, msg: &impl ConsensusMessage) -> bool {
        let Some(validator) = self.validator_set.get_validator(msg.validator_index()) else {
            debug!(
                target: LOG_TARGET,
                validator_idx = %msg.validator_index(),
                "Unknown validator"
            );
            return false;
        };

        self.verifier
            .verify(
                msg.signature(),
                &msg.signing_payload(),
                &validator.consensus_public_key(),
            )
            .await
    }

    fn skipped(msg: &impl ConsensusMessage, reason: &'static str) -> ProcessResult {
        trace!(
            target: LOG_TARGET,
            height = %msg.height(),
            round = %msg.round(),
            validator_idx = %msg.validator_index(),
            %reason,
            "Skipped message"
        );
        Ok(ProcessorResult::Skipped)
    }

    fn invalid(msg: &impl ConsensusMessage, reason: &'static str) -> ProcessResult {
        debug!(
            target: LOG_TARGET,
            height = %msg.height(),
            round = %msg.round(),
            validator_idx = %msg.validator_index(),
            %reason,
            "Invalid message"
        );
        Ok(ProcessorResult::Invalid)
    }

    /// Broadcast in the background, failures are only logged
    fn spawn_broadcast<F>(&self, kind: &'static str, broadcast: F)
    where
        F: Future<Output = BoxedErrorResult<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(err) = broadcast.await {
                warn!(
                    target: LOG_TARGET,
                    %kind,
                    err = %err.fmt_compact(),
                    "Failed to broadcast message"
                );
            }
        });
    }

    /// Let the consensus react to `round_state` changing, in the background
    fn spawn_consensus_handle(&self, round_state: Arc<RoundState>) {
        let consensus = self.consensus.clone();
        tokio::spawn(async move {
            let height = round_state.height();
            let round = round_state.round();
            if let Err(err) = consensus.handle(round_state).await {
                warn!(
                    target: LOG_TARGET,
                    %height,
                    %round,
                    err = %err.fmt_compact(),
                    "Consensus failed to handle round state"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests;
