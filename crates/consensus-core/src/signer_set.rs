//! Fixed-size bitset of validators that contributed to an aggregated
//! signature

use bincode::{Decode, Encode};
use convi::CastInto as _;

use crate::validator::ValidatorIdx;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct SignerSet([u8; 32]);

impl Default for SignerSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl SignerSet {
    pub const EMPTY: Self = Self([0u8; 32]);
    /// Max number of validators that can be represented
    pub const CAPACITY: u32 = 256;

    fn position(idx: ValidatorIdx) -> Option<(usize, u8)> {
        if Self::CAPACITY <= idx.to_number() {
            return None;
        }
        let bit = idx.as_usize();

        Some((31 - (bit >> 3), 1 << (bit & 0x7)))
    }

    /// Insert a validator, returns `false` if it does not fit in the set
    pub fn insert(&mut self, idx: ValidatorIdx) -> bool {
        let Some((byte, mask)) = Self::position(idx) else {
            return false;
        };
        self.0[byte] |= mask;
        true
    }

    pub fn remove(&mut self, idx: ValidatorIdx) {
        if let Some((byte, mask)) = Self::position(idx) {
            self.0[byte] &= !mask;
        }
    }

    pub fn contains(&self, idx: ValidatorIdx) -> bool {
        Self::position(idx).is_some_and(|(byte, mask)| self.0[byte] & mask != 0)
    }

    pub fn len(&self) -> usize {
        self.0
            .iter()
            .fold(0u32, |acc, b| acc + b.count_ones())
            .cast_into()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the validators in the set, in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ValidatorIdx> + '_ {
        (0..Self::CAPACITY)
            .map(ValidatorIdx::new)
            .filter(|idx| self.contains(*idx))
    }
}

impl FromIterator<ValidatorIdx> for SignerSet {
    fn from_iter<T: IntoIterator<Item = ValidatorIdx>>(iter: T) -> Self {
        let mut set = Self::EMPTY;
        for idx in iter {
            set.insert(idx);
        }
        set
    }
}
