use core::fmt;

use bincode::{Decode, Encode};
use convi::CastFrom as _;
use derive_more::From;
use serde::{Deserialize, Serialize};

/// Number of validators actively participating in the consensus at a height
#[derive(
    Debug, Clone, Copy, From, PartialEq, Eq, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NumValidators(u32);

impl fmt::Display for NumValidators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl NumValidators {
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Total number of validators
    pub fn total(self) -> usize {
        usize::cast_from(self.0)
    }

    /// Max number of faulty validators
    pub fn max_faulty(self) -> usize {
        self.total().saturating_sub(1) / 3
    }

    /// Number of validators required to reach a decision (more than 2/3)
    pub fn threshold(self) -> usize {
        self.total() - self.max_faulty()
    }

    /// Number of validators guaranteed to include at least one honest one
    /// (more than 1/3)
    pub fn minority(self) -> usize {
        self.max_faulty() + 1
    }
}

#[test]
fn num_validators_sanity() {
    for (n, f, t, m) in [
        (1, 0, 1, 1),
        (2, 0, 2, 1),
        (3, 0, 3, 1),
        (4, 1, 3, 2),
        (7, 2, 5, 3),
        (53, 17, 36, 18),
    ] {
        let num = NumValidators::from(n);
        assert_eq!(usize::cast_from(n), num.total());
        assert_eq!(f, num.max_faulty());
        assert_eq!(t, num.threshold());
        assert_eq!(m, num.minority());
    }
}
