//! Contracts of the cryptographic collaborators, and their Ed25519
//! implementations
use std::sync::Arc;

use async_trait::async_trait;
use bincode::{Decode, Encode};
use tracing::trace;

use crate::Signature;
use crate::num_validators::NumValidators;
use crate::signer_set::SignerSet;
use crate::validator::{ConsensusPublicKey, ConsensusSeckey, ValidatorIdx, ValidatorSet};

const LOG_TARGET: &str = "tbft::consensus::crypto";

/// Verifies single signatures made with consensus keys
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        signature: &Signature,
        message: &[u8],
        public_key: &ConsensusPublicKey,
    ) -> bool;
}

/// Threshold signature: proof that a set of validators signed the same
/// payload
///
/// `signatures` are ordered the same as the validators in `signers`
/// (ascending index).
#[derive(Encode, Decode, Clone, Debug, PartialEq, Eq)]
pub struct AggregatedSignature {
    pub signers: SignerSet,
    pub signatures: Vec<Signature>,
}

/// Verifies threshold-aggregated signatures (lock proofs)
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Verify that at least a quorum of `active_validators` signed
    /// `signed_payload`
    async fn verify(
        &self,
        lock_proof: &AggregatedSignature,
        signed_payload: &[u8],
        active_validators: NumValidators,
    ) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    pub fn verify_sync(
        signature: &Signature,
        message: &[u8],
        public_key: &ConsensusPublicKey,
    ) -> bool {
        let Ok(verifying_key) = ed25519_dalek::VerifyingKey::try_from(*public_key) else {
            trace!(target: LOG_TARGET, %public_key, "Invalid public key");
            return false;
        };
        let Ok(signature) = ed25519_dalek::Signature::try_from(signature) else {
            return false;
        };

        verifying_key.verify_strict(message, &signature).is_ok()
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        signature: &Signature,
        message: &[u8],
        public_key: &ConsensusPublicKey,
    ) -> bool {
        Self::verify_sync(signature, message, public_key)
    }
}

/// [`Aggregator`] over plain Ed25519 multi-signatures
///
/// A lock proof carries one signature for every signer.
pub struct MultiSigAggregator {
    validator_set: Arc<dyn ValidatorSet>,
}

impl MultiSigAggregator {
    pub fn new(validator_set: Arc<dyn ValidatorSet>) -> Self {
        Self { validator_set }
    }

    /// Sign `payload` with every key, building a proof
    pub fn aggregate(
        payload: &[u8],
        signers: impl IntoIterator<Item = (ValidatorIdx, ConsensusSeckey)>,
    ) -> AggregatedSignature {
        let mut signers: Vec<_> = signers.into_iter().collect();
        signers.sort_by_key(|(idx, _)| *idx);
        signers.dedup_by_key(|(idx, _)| *idx);

        AggregatedSignature {
            signers: signers.iter().map(|(idx, _)| *idx).collect(),
            signatures: signers
                .iter()
                .map(|(_, seckey)| seckey.sign(payload))
                .collect(),
        }
    }
}

#[async_trait]
impl Aggregator for MultiSigAggregator {
    async fn verify(
        &self,
        lock_proof: &AggregatedSignature,
        signed_payload: &[u8],
        active_validators: NumValidators,
    ) -> bool {
        let num_signers = lock_proof.signers.len();

        if num_signers < active_validators.threshold() {
            trace!(
                target: LOG_TARGET,
                %num_signers,
                threshold = %active_validators.threshold(),
                "Not enough signers"
            );
            return false;
        }
        if num_signers != lock_proof.signatures.len() {
            return false;
        }

        for (idx, signature) in lock_proof.signers.iter().zip(&lock_proof.signatures) {
            if active_validators.total() <= idx.as_usize() {
                return false;
            }
            let Some(validator) = self.validator_set.get_validator(idx) else {
                return false;
            };
            if !Ed25519Verifier::verify_sync(
                signature,
                signed_payload,
                &validator.consensus_public_key(),
            ) {
                trace!(target: LOG_TARGET, %idx, "Invalid signature in lock proof");
                return false;
            }
        }

        true
    }
}
