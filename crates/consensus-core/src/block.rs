use std::fmt;
use std::sync::Arc;

use bincode::{Decode, Encode};
use snafu::Snafu;

use crate::height::Height;
use crate::signed::Hashable;
use crate::validator::WalletPublicKey;

macro_rules! hash_type_define {
    (
        $(#[$outer:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$outer])*
        #[derive(Encode, Decode, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const ZERO: Self = Self([0u8; 32]);

            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_slice(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<blake3::Hash> for $name {
            fn from(value: blake3::Hash) -> Self {
                Self(*value.as_bytes())
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
    };
}

hash_type_define! {
    /// Block identifier, the hash of its [`BlockHeader`]
    pub struct BlockId;
}

hash_type_define! {
    /// Commits to the block payload
    pub struct BlockPayloadHash;
}

#[derive(Debug, Encode, Decode, Copy, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub height: Height,
    /// Id of the previous committed block
    pub previous_block: BlockId,
    /// Wallet of the validator that generated the block
    pub generator_public_key: WalletPublicKey,
    /// Milliseconds since unix epoch
    pub timestamp: u64,
    pub payload_len: u32,
    pub payload_hash: BlockPayloadHash,
}

impl Hashable for BlockHeader {}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ContentMismatchError {
    PayloadHashMismatch,
    PayloadLenMismatch,
}

pub type ContentMismatchResult<T> = std::result::Result<T, ContentMismatchError>;

/// Full block, as carried by a proposal
#[derive(Debug, Encode, Decode, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Arc<[u8]>,
}

impl Block {
    pub fn new(
        height: Height,
        previous_block: BlockId,
        generator_public_key: WalletPublicKey,
        timestamp: u64,
        payload: impl Into<Arc<[u8]>>,
    ) -> Self {
        let payload = payload.into();
        Self {
            header: BlockHeader {
                height,
                previous_block,
                generator_public_key,
                timestamp,
                payload_len: u32::try_from(payload.len()).expect("Payload too large"),
                payload_hash: payload_hash(&payload),
            },
            payload,
        }
    }

    pub fn id(&self) -> BlockId {
        self.header.hash().into()
    }

    /// Check that the header commits to the payload
    pub fn verify_content(&self) -> ContentMismatchResult<()> {
        if u32::try_from(self.payload.len()).ok() != Some(self.header.payload_len) {
            PayloadLenMismatchSnafu.fail()?;
        }
        if payload_hash(&self.payload) != self.header.payload_hash {
            PayloadHashMismatchSnafu.fail()?;
        }
        Ok(())
    }
}

fn payload_hash(payload: &[u8]) -> BlockPayloadHash {
    blake3::hash(payload).into()
}
