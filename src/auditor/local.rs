//! Local-keyfile tree-head signing, used outside of `kms-gcp` builds.

use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;

use crate::Hash;
use crate::auditor::PublicConfig;
use crate::proto::transparency::AuditorTreeHead;
use crate::state::{AuditorState, AuditorStateAndSignature};

/// Holds the auditor's own Ed25519 signing key alongside the public
/// configuration it signs over.
pub struct Auditor {
    pub config: PublicConfig,
    pub key: SigningKey,
}

impl Auditor {
    /// Signs a tree head at the current wall-clock time.
    pub async fn sign_head(&self, head: Hash, size: u64) -> Result<AuditorTreeHead, anyhow::Error> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        Ok(self.sign_at_time(head, size, ts as i64))
    }

    /// Signs a tree head at a caller-supplied time, for deterministic
    /// testing.
    pub fn sign_at_time(&self, head: Hash, size: u64, timestamp_ms: i64) -> AuditorTreeHead {
        let msg = self.config.encode_at_time(head, size, timestamp_ms);
        let sig = self.key.sign(&msg);
        AuditorTreeHead {
            tree_size: size,
            timestamp_ms,
            signature: sig.to_vec(),
        }
    }

    /// Self-signs a persisted auditor state under the local key.
    pub async fn sign_state(&self, state: &AuditorState) -> Result<AuditorStateAndSignature, anyhow::Error> {
        let serialized_auditor_state = state.serialize()?;
        let signature = self.key.sign(&serialized_auditor_state).to_vec();
        Ok(AuditorStateAndSignature {
            serialized_auditor_state,
            signature,
        })
    }
}
