use bincode::Encode;

use crate::Signature;
use crate::bincode::CONSENSUS_BINCODE_CONFIG;
use crate::validator::ConsensusSeckey;

/// Domain separation prefix of every signing payload
pub const SIGN_DOMAIN: [u8; 4] = *b"tbft";

pub trait Hashable: Encode {
    fn hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();

        bincode::encode_into_std_write(self, &mut hasher, CONSENSUS_BINCODE_CONFIG)
            .expect("Can't fail");

        hasher.finalize()
    }
}

/// Something that is signed by a validator's consensus key
pub trait Signable: Encode {
    /// Unique tag preventing two different type of messages with the same
    /// encoding from conflicting with each other
    const TAG: [u8; 4];

    /// The exact bytes the signature is made over
    fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&SIGN_DOMAIN);
        buf.extend_from_slice(&Self::TAG);

        bincode::encode_into_std_write(self, &mut buf, CONSENSUS_BINCODE_CONFIG)
            .expect("Can't fail");

        buf
    }

    fn sign_with(&self, seckey: ConsensusSeckey) -> Signature {
        seckey.sign(&self.signing_payload())
    }
}
