// SPDX-License-Identifier: MIT

//! Core types used by the consensus message pipeline
//!
//! Focused on the data model of the consensus messages, their canonical
//! wire encoding and the contracts of the cryptographic collaborators
//! (signature verification, lock proof aggregation) used to validate them.
use std::fmt;

use ::bincode::{Decode, Encode};

pub mod bincode;
pub mod block;
pub mod crypto;
pub mod factory;
pub mod height;
pub mod msg;
pub mod num_validators;
pub mod signed;
pub mod signer_set;
pub mod state;
pub mod validator;

/// Raw signature bytes
///
/// The exact format depends on the signature scheme of the key it was
/// produced with, so it's kept opaque here.
#[derive(Encode, Decode, Clone, PartialEq, Eq, Default)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        data_encoding::HEXLOWER.encode_write(&self.0, f)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(value: ed25519_dalek::Signature) -> Self {
        Self(value.to_bytes().to_vec())
    }
}

impl TryFrom<&Signature> for ed25519_dalek::Signature {
    type Error = ed25519_dalek::SignatureError;

    fn try_from(value: &Signature) -> Result<Self, Self::Error> {
        ed25519_dalek::Signature::from_slice(&value.0)
    }
}
