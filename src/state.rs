//! Persisted auditor state.
//!
//! What gets written to the repository between ticks is not the full
//! replayed trees, but the minimal facts needed to resume: how many updates
//! have been processed, the prefix tree's current root, and the condensed
//! log tree's retained nodes. The serialized state is self-signed under the
//! auditor's own key before it's handed to the repository, so a later load
//! can detect if the repository (or the auditor's own key) was swapped out
//! from under it.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::log::LogTreeNode;
use crate::transparency::AuditTrees;
use crate::Hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorState {
    pub total_updates_processed: u64,
    pub current_prefix_root: Hash,
    pub log_nodes: Vec<LogTreeNode>,
}

impl AuditorState {
    /// Snapshots the current trees into their persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvariantViolation`] if the trees have never
    /// had an update applied — there is nothing meaningful to persist yet.
    pub fn from_trees(trees: &AuditTrees) -> Result<Self, AuditError> {
        let current_prefix_root = trees
            .current_prefix_root()
            .ok_or(AuditError::InvariantViolation("trees are uninitialized".into()))?;

        Ok(Self {
            total_updates_processed: trees.total_updates_processed(),
            current_prefix_root,
            log_nodes: trees.log_nodes().to_vec(),
        })
    }

    pub fn into_trees(self) -> Result<AuditTrees, AuditError> {
        AuditTrees::from_parts(self.current_prefix_root, self.total_updates_processed, self.log_nodes)
    }

    /// Encodes this state to the exact bytes an [`AuditorStateAndSignature`]
    /// signs over. The local-keyfile and KMS `Auditor` backends each sign
    /// these bytes their own way (`sign_state`) rather than this type
    /// knowing how to reach a signing key.
    pub fn serialize(&self) -> Result<Vec<u8>, anyhow::Error> {
        Ok(serde_cbor::to_vec(self)?)
    }
}

/// The wire/storage form: a serialized [`AuditorState`] plus the auditor's
/// signature over those exact bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditorStateAndSignature {
    pub serialized_auditor_state: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AuditorStateAndSignature {
    /// Verifies the signature and decodes the enclosed state.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidAuditorSignature`] if the signature
    /// does not verify under `verifying_key`, and
    /// [`AuditError::InvariantViolation`] if the signed bytes aren't a
    /// valid `AuditorState`.
    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<AuditorState, AuditError> {
        let signature = Signature::from_slice(&self.signature)
            .map_err(|_| AuditError::InvariantViolation("malformed signature bytes".into()))?;

        verifying_key
            .verify(&self.serialized_auditor_state, &signature)
            .map_err(|_| AuditError::InvalidAuditorSignature)?;

        serde_cbor::from_slice(&self.serialized_auditor_state)
            .map_err(|e| AuditError::InvariantViolation(format!("malformed persisted state: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    fn sample_state() -> AuditorState {
        AuditorState {
            total_updates_processed: 1,
            current_prefix_root: Hash::default(),
            log_nodes: vec![LogTreeNode {
                id: 0,
                hash: Hash::default(),
            }],
        }
    }

    fn sign_for_test(state: &AuditorState, key: &SigningKey) -> AuditorStateAndSignature {
        let serialized_auditor_state = state.serialize().unwrap();
        let signature = key.sign(&serialized_auditor_state).to_vec();
        AuditorStateAndSignature {
            serialized_auditor_state,
            signature,
        }
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let state = sample_state();

        let signed = sign_for_test(&state, &key);
        let recovered = signed.verify(&key.verifying_key()).unwrap();

        assert_eq!(recovered.total_updates_processed, state.total_updates_processed);
        assert_eq!(recovered.current_prefix_root, state.current_prefix_root);
        assert_eq!(recovered.log_nodes, state.log_nodes);
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let other_key = SigningKey::from_bytes(&[10u8; 32]);
        let signed = sign_for_test(&sample_state(), &key);

        let err = signed.verify(&other_key.verifying_key()).unwrap_err();
        assert!(matches!(err, AuditError::InvalidAuditorSignature));
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let mut signed = sign_for_test(&sample_state(), &key);
        signed.serialized_auditor_state[0] ^= 0xFF;

        let err = signed.verify(&key.verifying_key()).unwrap_err();
        assert!(matches!(err, AuditError::InvalidAuditorSignature));
    }
}
