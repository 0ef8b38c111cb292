use bincode::{Decode, Encode};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Sequence number of the block being agreed upon
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    From,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Clone,
    Copy,
    Default,
)]
#[serde(transparent)]
pub struct Height(u64);

impl Height {
    pub const ZERO: Self = Self(0);

    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    pub const fn to_number(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

/// Attempt number within a [`Height`]
///
/// Starts at `0` and increases each time a round fails to produce a
/// decision (proposer failure, timeouts).
#[derive(
    Encode,
    Decode,
    Serialize,
    Deserialize,
    From,
    Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Clone,
    Copy,
    Default,
)]
#[serde(transparent)]
pub struct Round(u32);

impl Round {
    pub const ZERO: Self = Self(0);

    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    pub const fn to_number(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// `self + n`, saturating at the maximum round
    pub fn saturating_add(self, n: u32) -> Self {
        Self(self.0.saturating_add(n))
    }
}
