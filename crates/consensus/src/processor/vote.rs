use std::marker::PhantomData;

use async_trait::async_trait;
use tbft_consensus_core::factory::MessageFactory;
use tbft_consensus_core::msg::{ConsensusMessage, MessageDecodeResult, Precommit, Prevote};
use tbft_consensus_core::validator::ValidatorIdx;
use tbft_consensus_storage::{ConsensusStorage, ConsensusStorageResult};
use tbft_util_error::BoxedErrorResult;
use tbft_util_error::fmt::FmtCompact as _;
use tracing::{Level, debug, instrument, warn};

use super::{LOG_TARGET, ProcessResult, ProcessorCtx, ProcessorResult};
use crate::round_state::{InsertOutcome, RoundState};
use crate::service::Broadcaster;

/// A vote kind a [`VoteProcessor`] can handle
#[async_trait]
pub trait ProcessableVote: ConsensusMessage {
    const NAME: &'static str;

    fn decode(factory: &dyn MessageFactory, bytes: &[u8]) -> MessageDecodeResult<Self>;
    fn add_to(self, round_state: &RoundState) -> InsertOutcome<Self>;
    fn remove_from(round_state: &RoundState, validator_idx: ValidatorIdx);
    async fn save(&self, storage: &ConsensusStorage) -> ConsensusStorageResult<()>;
    async fn broadcast(&self, broadcaster: &dyn Broadcaster) -> BoxedErrorResult<()>;
}

#[async_trait]
impl ProcessableVote for Prevote {
    const NAME: &'static str = "prevote";

    fn decode(factory: &dyn MessageFactory, bytes: &[u8]) -> MessageDecodeResult<Self> {
        factory.make_prevote_from_bytes(bytes)
    }

    fn add_to(self, round_state: &RoundState) -> InsertOutcome<Self> {
        round_state.add_prevote(self)
    }

    fn remove_from(round_state: &RoundState, validator_idx: ValidatorIdx) {
        round_state.remove_prevote(validator_idx);
    }

    async fn save(&self, storage: &ConsensusStorage) -> ConsensusStorageResult<()> {
        storage.save_prevote(self).await
    }

    async fn broadcast(&self, broadcaster: &dyn Broadcaster) -> BoxedErrorResult<()> {
        broadcaster.broadcast_prevote(self).await
    }
}

#[async_trait]
impl ProcessableVote for Precommit {
    const NAME: &'static str = "precommit";

    fn decode(factory: &dyn MessageFactory, bytes: &[u8]) -> MessageDecodeResult<Self> {
        factory.make_precommit_from_bytes(bytes)
    }

    fn add_to(self, round_state: &RoundState) -> InsertOutcome<Self> {
        round_state.add_precommit(self)
    }

    fn remove_from(round_state: &RoundState, validator_idx: ValidatorIdx) {
        round_state.remove_precommit(validator_idx);
    }

    async fn save(&self, storage: &ConsensusStorage) -> ConsensusStorageResult<()> {
        storage.save_precommit(self).await
    }

    async fn broadcast(&self, broadcaster: &dyn Broadcaster) -> BoxedErrorResult<()> {
        broadcaster.broadcast_precommit(self).await
    }
}

/// Processor of prevotes or precommits
///
/// Both go through the same pipeline, there's no proposer or lock proof
/// involved in votes.
pub struct VoteProcessor<V> {
    ctx: ProcessorCtx,
    _vote: PhantomData<fn() -> V>,
}

pub type PrevoteProcessor = VoteProcessor<Prevote>;
pub type PrecommitProcessor = VoteProcessor<Precommit>;

impl<V> VoteProcessor<V>
where
    V: ProcessableVote,
{
    pub fn new(ctx: ProcessorCtx) -> Self {
        Self {
            ctx,
            _vote: PhantomData,
        }
    }

    /// Process a vote received in wire encoding
    #[instrument(
        name = "process_vote",
        skip_all,
        fields(kind = V::NAME, len = data.len(), broadcast = broadcast),
        ret(level = Level::DEBUG),
        err
    )]
    pub async fn process(&self, data: &[u8], broadcast: bool) -> ProcessResult {
        let vote = match V::decode(self.ctx.message_factory.as_ref(), data) {
            Ok(vote) => vote,
            Err(err) => {
                debug!(target: LOG_TARGET, err = %err.fmt_compact(), "Malformed vote");
                return Ok(ProcessorResult::Invalid);
            }
        };

        self.process_vote(vote, broadcast).await
    }

    /// Process an already decoded vote, e.g. one made locally
    pub async fn process_vote(&self, vote: V, broadcast: bool) -> ProcessResult {
        if !self.ctx.has_valid_height_or_round(&vote) {
            return ProcessorCtx::skipped(&vote, "not for the current height and round");
        }

        if !self.ctx.has_valid_signature(&vote).await {
            return ProcessorCtx::invalid(&vote, "invalid signature");
        }

        let round_state = self
            .ctx
            .round_states
            .get_round_state(vote.height(), vote.round());

        if let InsertOutcome::AlreadyPresent(_) = vote.clone().add_to(&round_state) {
            return ProcessorCtx::skipped(&vote, "validator already voted in the round");
        }

        if let Err(err) = vote.save(&self.ctx.storage).await {
            V::remove_from(&round_state, vote.validator_index());
            warn!(
                target: LOG_TARGET,
                kind = V::NAME,
                height = %vote.height(),
                round = %vote.round(),
                validator_idx = %vote.validator_index(),
                err = %err.fmt_compact(),
                "Failed to persist vote"
            );
            return Err(err);
        }

        debug!(
            target: LOG_TARGET,
            kind = V::NAME,
            height = %vote.height(),
            round = %vote.round(),
            validator_idx = %vote.validator_index(),
            "Accepted vote"
        );

        if broadcast {
            let broadcaster = self.ctx.broadcaster.clone();
            self.ctx.spawn_broadcast(V::NAME, async move {
                vote.broadcast(broadcaster.as_ref()).await
            });
        }
        self.ctx.spawn_consensus_handle(round_state);

        Ok(ProcessorResult::Accepted)
    }
}
