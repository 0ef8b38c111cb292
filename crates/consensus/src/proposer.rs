//! Proposer selection

use num_bigint::BigUint;
use tbft_consensus_core::bincode::encode_to_vec;
use tbft_consensus_core::height::{Height, Round};
use tbft_consensus_core::num_validators::NumValidators;
use tbft_consensus_core::validator::ValidatorIdx;

/// Maps a round of the current height to the validator expected to propose
/// in it
pub trait ProposerSelector: Send + Sync {
    fn get_validator_index(&self, round: Round) -> ValidatorIdx;
}

/// Picks the proposer pseudo-randomly as `blake3(height, round) mod n`
///
/// Bound to a single height, a new one is created for every height.
#[derive(Debug, Clone, Copy)]
pub struct HashedProposerSelector {
    height: Height,
    active_validators: NumValidators,
}

impl HashedProposerSelector {
    pub fn new(height: Height, active_validators: NumValidators) -> Self {
        assert_ne!(active_validators.total(), 0, "No active validators");
        Self {
            height,
            active_validators,
        }
    }

    pub fn height(&self) -> Height {
        self.height
    }
}

impl ProposerSelector for HashedProposerSelector {
    fn get_validator_index(&self, round: Round) -> ValidatorIdx {
        let hash = blake3::hash(&encode_to_vec(&(self.height, round)));

        let idx = BigUint::from_bytes_be(hash.as_bytes())
            % BigUint::from(self.active_validators.total());

        ValidatorIdx::new(u32::try_from(&idx).expect("Can't fail"))
    }
}
