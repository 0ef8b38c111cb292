//! Consensus configuration
//!
//! Milestones form a schedule of consensus parameters: the milestone in
//! effect at a height is the one with the greatest `height` not above it.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu, ensure};
use tbft_consensus_core::height::{Height, Round};
use tbft_consensus_core::num_validators::NumValidators;

pub const DEFAULT_MAX_ROUNDS_AHEAD: u32 = 100;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Invalid config json"))]
    Json { source: serde_json::Error },
    #[snafu(display("Missing milestone for height 0"))]
    MissingGenesisMilestone,
    #[snafu(display("Duplicate milestone at height {height}"))]
    DuplicateMilestone { height: Height },
    #[snafu(display("Milestone at height {height} has no active validators"))]
    NoActiveValidators { height: Height },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    /// Height the milestone takes effect at
    pub height: Height,
    pub active_validators: NumValidators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsensusConfigRaw {
    max_rounds_ahead: Option<u32>,
    milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusConfig {
    max_rounds_ahead: u32,
    #[serde(serialize_with = "serialize_milestones")]
    milestones: BTreeMap<Height, Milestone>,
}

fn serialize_milestones<S>(
    milestones: &BTreeMap<Height, Milestone>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(milestones.values())
}

#[bon::bon]
impl ConsensusConfig {
    #[builder]
    pub fn new(max_rounds_ahead: Option<u32>, milestones: Vec<Milestone>) -> ConfigResult<Self> {
        let mut by_height = BTreeMap::new();

        for milestone in milestones {
            ensure!(
                milestone.active_validators.total() != 0,
                NoActiveValidatorsSnafu {
                    height: milestone.height
                }
            );
            ensure!(
                by_height.insert(milestone.height, milestone).is_none(),
                DuplicateMilestoneSnafu {
                    height: milestone.height
                }
            );
        }
        ensure!(
            by_height.contains_key(&Height::ZERO),
            MissingGenesisMilestoneSnafu
        );

        Ok(Self {
            max_rounds_ahead: max_rounds_ahead.unwrap_or(DEFAULT_MAX_ROUNDS_AHEAD),
            milestones: by_height,
        })
    }
}

impl ConsensusConfig {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let raw: ConsensusConfigRaw = serde_json::from_str(json).context(JsonSnafu)?;

        Self::builder()
            .maybe_max_rounds_ahead(raw.max_rounds_ahead)
            .milestones(raw.milestones)
            .build()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("Can't fail")
    }

    pub fn max_rounds_ahead(&self) -> u32 {
        self.max_rounds_ahead
    }

    /// Highest round a proposal can have while the node is at `current`
    pub fn max_proposal_round(&self, current: Round) -> Round {
        current.saturating_add(self.max_rounds_ahead)
    }

    /// Milestone in effect at `height`
    pub fn milestone(&self, height: Height) -> &Milestone {
        self.milestones
            .range(..=height)
            .next_back()
            .map(|(_, milestone)| milestone)
            .expect("Milestone for height 0 is always present")
    }

    pub fn active_validators(&self, height: Height) -> NumValidators {
        self.milestone(height).active_validators
    }
}
