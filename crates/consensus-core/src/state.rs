use bincode::{Decode, Encode};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::height::{Height, Round};

/// Step of a round the consensus is in
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Default, Encode, Decode, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Propose,
    Prevote,
    Precommit,
}

/// Durable consensus cursor
///
/// Enough to resume consensus on the current (uncommitted) height after
/// a restart, together with the persisted in-flight messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ConsensusStateData {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    pub locked_round: Option<Round>,
    pub valid_round: Option<Round>,
}
