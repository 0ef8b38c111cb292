//! Consensus messages: [`Proposal`], [`Prevote`] and [`Precommit`]
//!
//! Every message keeps the exact bytes it was decoded from (or encoded to),
//! so they can be stored and re-broadcast without re-encoding.
use std::sync::Arc;

use bincode::{Decode, Encode};
use snafu::{ResultExt as _, Snafu};

use crate::Signature;
use crate::bincode::{decode_whole, encode_to_vec};
use crate::block::{Block, BlockId, ContentMismatchError};
use crate::crypto::AggregatedSignature;
use crate::height::{Height, Round};
use crate::signed::Signable;
use crate::validator::{ConsensusSeckey, ValidatorIdx};

#[derive(Debug, Snafu)]
pub enum MessageDecodeError {
    #[snafu(display("Malformed message encoding"))]
    Bincode {
        source: bincode::error::DecodeError,
    },
    #[snafu(display("Message encoding is not canonical"))]
    NonCanonical,
    #[snafu(display("Block does not match its header"))]
    BlockContent { source: ContentMismatchError },
}

pub type MessageDecodeResult<T> = Result<T, MessageDecodeError>;

/// Fields common to all consensus messages
pub trait ConsensusMessage: Clone + Send + Sync + 'static {
    fn height(&self) -> Height;
    fn round(&self) -> Round;
    fn validator_index(&self) -> ValidatorIdx;
    fn signature(&self) -> &Signature;
    /// Canonical encoding of the message, without the signature, that the
    /// signature is made over
    fn signing_payload(&self) -> Vec<u8>;
    /// Canonical wire encoding of the whole message
    fn serialized(&self) -> &Arc<[u8]>;
}

fn decode_canonical<D>(bytes: &[u8]) -> MessageDecodeResult<(D, Signature)>
where
    D: Decode<()> + Encode,
{
    let (data, signature): (D, Signature) = decode_whole(bytes).context(BincodeSnafu)?;

    if encode_to_vec(&(&data, &signature)) != bytes {
        return NonCanonicalSnafu.fail();
    }

    Ok((data, signature))
}

#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct ProposalData {
    pub height: Height,
    pub round: Round,
    pub validator_index: ValidatorIdx,
    pub block: Block,
    /// Round at which the proposer saw the block locked, if re-proposing
    pub valid_round: Option<Round>,
    /// Proof that a quorum prevoted `block` at `valid_round`
    pub lock_proof: Option<AggregatedSignature>,
}

impl Signable for ProposalData {
    const TAG: [u8; 4] = *b"prop";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    data: ProposalData,
    signature: Signature,
    serialized: Arc<[u8]>,
}

impl Proposal {
    pub fn new(data: ProposalData, signature: Signature) -> Self {
        let serialized = encode_to_vec(&(&data, &signature)).into();
        Self {
            data,
            signature,
            serialized,
        }
    }

    pub fn new_signed(data: ProposalData, seckey: ConsensusSeckey) -> Self {
        let signature = data.sign_with(seckey);
        Self::new(data, signature)
    }

    pub fn from_bytes(bytes: &[u8]) -> MessageDecodeResult<Self> {
        let (data, signature) = decode_canonical::<ProposalData>(bytes)?;

        data.block.verify_content().context(BlockContentSnafu)?;

        Ok(Self {
            data,
            signature,
            serialized: bytes.into(),
        })
    }

    pub fn data(&self) -> &ProposalData {
        &self.data
    }

    pub fn block(&self) -> &Block {
        &self.data.block
    }

    pub fn valid_round(&self) -> Option<Round> {
        self.data.valid_round
    }

    pub fn lock_proof(&self) -> Option<&AggregatedSignature> {
        self.data.lock_proof.as_ref()
    }
}

impl ConsensusMessage for Proposal {
    fn height(&self) -> Height {
        self.data.height
    }

    fn round(&self) -> Round {
        self.data.round
    }

    fn validator_index(&self) -> ValidatorIdx {
        self.data.validator_index
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn signing_payload(&self) -> Vec<u8> {
        self.data.signing_payload()
    }

    fn serialized(&self) -> &Arc<[u8]> {
        &self.serialized
    }
}

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteKind {
    Prevote,
    Precommit,
}

/// What a validator actually signs when voting
///
/// Notably it does not include the validator index, so the same vote from
/// different validators signs the same bytes, which allows aggregating them
/// into a lock proof.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteForSignature {
    pub kind: VoteKind,
    pub height: Height,
    pub round: Round,
    /// `None` is a vote for nil
    pub block_id: Option<BlockId>,
}

impl Signable for VoteForSignature {
    const TAG: [u8; 4] = *b"vote";
}

#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteData {
    pub height: Height,
    pub round: Round,
    pub validator_index: ValidatorIdx,
    pub block_id: Option<BlockId>,
}

impl VoteData {
    pub fn for_signature(&self, kind: VoteKind) -> VoteForSignature {
        VoteForSignature {
            kind,
            height: self.height,
            round: self.round,
            block_id: self.block_id,
        }
    }
}

macro_rules! vote_define {
    (
        $(#[$outer:meta])*
        pub struct $name:ident;

        KIND = $kind:expr;
    ) => {
        $(#[$outer])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            data: VoteData,
            signature: Signature,
            serialized: Arc<[u8]>,
        }

        impl $name {
            pub const KIND: VoteKind = $kind;

            pub fn new(data: VoteData, signature: Signature) -> Self {
                let serialized = encode_to_vec(&(&data, &signature)).into();
                Self {
                    data,
                    signature,
                    serialized,
                }
            }

            pub fn new_signed(data: VoteData, seckey: ConsensusSeckey) -> Self {
                let signature = data.for_signature(Self::KIND).sign_with(seckey);
                Self::new(data, signature)
            }

            pub fn from_bytes(bytes: &[u8]) -> MessageDecodeResult<Self> {
                let (data, signature) = decode_canonical::<VoteData>(bytes)?;

                Ok(Self {
                    data,
                    signature,
                    serialized: bytes.into(),
                })
            }

            pub fn data(&self) -> &VoteData {
                &self.data
            }

            pub fn block_id(&self) -> Option<BlockId> {
                self.data.block_id
            }

            pub fn is_nil(&self) -> bool {
                self.data.block_id.is_none()
            }
        }

        impl ConsensusMessage for $name {
            fn height(&self) -> Height {
                self.data.height
            }

            fn round(&self) -> Round {
                self.data.round
            }

            fn validator_index(&self) -> ValidatorIdx {
                self.data.validator_index
            }

            fn signature(&self) -> &Signature {
                &self.signature
            }

            fn signing_payload(&self) -> Vec<u8> {
                self.data.for_signature(Self::KIND).signing_payload()
            }

            fn serialized(&self) -> &Arc<[u8]> {
                &self.serialized
            }
        }
    };
}

vote_define! {
    /// First-stage vote, tentative support for a block (or nil)
    pub struct Prevote;

    KIND = VoteKind::Prevote;
}

vote_define! {
    /// Second-stage vote, committed support for a block (or nil)
    pub struct Precommit;

    KIND = VoteKind::Precommit;
}
