//! Contracts of the collaborators the processors drive

use std::sync::Arc;

use async_trait::async_trait;
use tbft_consensus_core::height::{Height, Round};
use tbft_consensus_core::msg::{Precommit, Prevote, Proposal};
use tbft_util_error::BoxedErrorResult;

use crate::round_state::RoundState;

/// Fan-out of accepted messages to peers
///
/// Best effort: processors don't wait for it, and only log its failures.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_proposal(&self, proposal: &Proposal) -> BoxedErrorResult<()>;
    async fn broadcast_prevote(&self, prevote: &Prevote) -> BoxedErrorResult<()>;
    async fn broadcast_precommit(&self, precommit: &Precommit) -> BoxedErrorResult<()>;
}

/// The consensus state machine, owning the current height and round
#[async_trait]
pub trait ConsensusService: Send + Sync {
    fn get_height(&self) -> Height;
    fn get_round(&self) -> Round;

    /// Re-evaluate step transitions after `round_state` changed
    async fn handle(&self, round_state: Arc<RoundState>) -> BoxedErrorResult<()>;
}
