//! Validators and their keys

use core::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
use convi::CastInto as _;
use derive_more::{Display, From};
use ed25519_dalek::ed25519::signature::Signer as _;
use snafu::Snafu;

use crate::Signature;

/// Index of a validator in the active validator set
///
/// The set of validators is known within the consensus,
/// so messages refer to them by index, to save space.
#[derive(
    Encode, Decode, From, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy,
)]
pub struct ValidatorIdx(u32);

impl ValidatorIdx {
    pub const fn new(i: u32) -> Self {
        Self(i)
    }

    pub const fn to_number(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0.cast_into()
    }
}

macro_rules! public_key_define {
    (
        $(#[$outer:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$outer])*
        #[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const LEN: usize = 32;

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                data_encoding::HEXLOWER.encode(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                data_encoding::HEXLOWER.encode_write(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                <Self as fmt::Display>::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = data_encoding::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let v = data_encoding::HEXLOWER_PERMISSIVE.decode(s.as_bytes())?;
                let a = v.try_into().map_err(|_| data_encoding::DecodeError {
                    position: 0,
                    kind: data_encoding::DecodeKind::Length,
                })?;
                Ok(Self(a))
            }
        }
    };
}

public_key_define! {
    /// Key a validator signs consensus messages with
    pub struct ConsensusPublicKey;
}

public_key_define! {
    /// Key of the wallet a validator generates blocks with
    pub struct WalletPublicKey;
}

impl WalletPublicKey {
    pub fn random() -> Self {
        Self(rand::random())
    }
}

#[derive(Debug, Snafu)]
pub struct InvalidPublicKeyError;

impl TryFrom<ConsensusPublicKey> for ed25519_dalek::VerifyingKey {
    type Error = InvalidPublicKeyError;

    fn try_from(value: ConsensusPublicKey) -> Result<Self, Self::Error> {
        ed25519_dalek::VerifyingKey::from_bytes(&value.0).map_err(|_| InvalidPublicKeyError)
    }
}

/// Secret counterpart of [`ConsensusPublicKey`]
#[derive(Clone, Copy)]
pub struct ConsensusSeckey([u8; 32]);

impl ConsensusSeckey {
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()).to_bytes())
    }

    pub fn pubkey(self) -> ConsensusPublicKey {
        ConsensusPublicKey(
            ed25519_dalek::SigningKey::from_bytes(&self.0)
                .verifying_key()
                .to_bytes(),
        )
    }

    pub fn sign(self, message: &[u8]) -> Signature {
        ed25519_dalek::SigningKey::from_bytes(&self.0)
            .sign(message)
            .into()
    }
}

impl fmt::Debug for ConsensusSeckey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsensusSeckey(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    pub consensus_public_key: ConsensusPublicKey,
    pub wallet_public_key: WalletPublicKey,
}

impl Validator {
    pub fn consensus_public_key(&self) -> ConsensusPublicKey {
        self.consensus_public_key
    }

    pub fn wallet_public_key(&self) -> WalletPublicKey {
        self.wallet_public_key
    }
}

/// The active validator set at the current height
pub trait ValidatorSet: Send + Sync {
    /// Look up a validator by index, `None` if there's no such validator
    fn get_validator(&self, idx: ValidatorIdx) -> Option<Validator>;
}

/// [`ValidatorSet`] over a fixed list of validators
#[derive(Debug, Clone, Default)]
pub struct StaticValidatorSet(Vec<Validator>);

impl StaticValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self(validators)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ValidatorSet for StaticValidatorSet {
    fn get_validator(&self, idx: ValidatorIdx) -> Option<Validator> {
        self.0.get(idx.as_usize()).copied()
    }
}
