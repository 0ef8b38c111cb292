//! Startup recovery of the in-flight height
use std::sync::Arc;

use tbft_consensus_core::height::Height;
use tbft_consensus_core::msg::ConsensusMessage;
use tbft_consensus_core::state::ConsensusStateData;
use tbft_consensus_storage::{ConsensusStorage, ConsensusStorageResult};
use tracing::{info, instrument, warn};

use crate::round_state::{InsertOutcome, RoundState, RoundStateRepository};

const LOG_TARGET: &str = "tbft::consensus::bootstrap";

pub struct Bootstrapper {
    storage: Arc<ConsensusStorage>,
    round_states: Arc<RoundStateRepository>,
}

impl Bootstrapper {
    pub fn new(storage: Arc<ConsensusStorage>, round_states: Arc<RoundStateRepository>) -> Self {
        Self {
            storage,
            round_states,
        }
    }

    /// Restore the consensus state of `expected_height`, the height after
    /// the last committed block
    ///
    /// Returns the persisted cursor, after replaying all the persisted
    /// messages into the round states. Persisted data for any other height
    /// is stale: it's dropped, and `None` is returned.
    #[instrument(skip_all, fields(expected_height = %expected_height))]
    pub async fn run(
        &self,
        expected_height: Height,
    ) -> ConsensusStorageResult<Option<ConsensusStateData>> {
        let Some(state) = self.storage.get_state().await? else {
            info!(target: LOG_TARGET, "No consensus state to restore");
            return Ok(None);
        };

        if state.height != expected_height {
            warn!(
                target: LOG_TARGET,
                stored_height = %state.height,
                "Skipping state restore, stored height does not match"
            );
            self.round_states.clear();
            self.storage.clear().await?;
            return Ok(None);
        }

        let proposals = self.replay(
            self.storage.get_proposals().await?,
            expected_height,
            RoundState::add_proposal,
        );
        let prevotes = self.replay(
            self.storage.get_prevotes().await?,
            expected_height,
            RoundState::add_prevote,
        );
        let precommits = self.replay(
            self.storage.get_precommits().await?,
            expected_height,
            RoundState::add_precommit,
        );

        info!(
            target: LOG_TARGET,
            round = %state.round,
            step = %state.step,
            %proposals,
            %prevotes,
            %precommits,
            "Restored consensus state"
        );

        Ok(Some(state))
    }

    /// Add `msgs` of `height` to their round states, returns how many were
    /// added
    fn replay<M>(
        &self,
        msgs: Vec<M>,
        height: Height,
        add: impl Fn(&RoundState, M) -> InsertOutcome<M>,
    ) -> usize
    where
        M: ConsensusMessage,
    {
        let mut restored = 0;
        for msg in msgs.into_iter().filter(|msg| msg.height() == height) {
            let round_state = self.round_states.get_round_state(height, msg.round());
            if add(&*round_state, msg).is_inserted() {
                restored += 1;
            }
        }
        restored
    }
}
