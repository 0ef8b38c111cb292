use crate::msg::{MessageDecodeResult, Precommit, Prevote, Proposal};

/// Turns wire bytes into typed consensus messages
pub trait MessageFactory: Send + Sync {
    fn make_proposal_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Proposal>;
    fn make_prevote_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Prevote>;
    fn make_precommit_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Precommit>;
}

/// [`MessageFactory`] for the canonical bincode wire encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct WireMessageFactory;

impl MessageFactory for WireMessageFactory {
    fn make_proposal_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Proposal> {
        Proposal::from_bytes(bytes)
    }

    fn make_prevote_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Prevote> {
        Prevote::from_bytes(bytes)
    }

    fn make_precommit_from_bytes(&self, bytes: &[u8]) -> MessageDecodeResult<Precommit> {
        Precommit::from_bytes(bytes)
    }
}
