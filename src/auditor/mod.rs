//! Tree-head signing.
//!
//! This auditor only ever operates in third-party-auditing mode, so the
//! encoded signing payload is fixed: the auditor's own public key is always
//! embedded, unconditionally, alongside the service's signing and VRF
//! public keys.

#[cfg(feature = "kms-gcp")]
mod kms;

#[cfg(not(feature = "kms-gcp"))]
mod local;

#[cfg(feature = "kms-gcp")]
pub use kms::*;

#[cfg(not(feature = "kms-gcp"))]
pub use local::*;

use ed25519_dalek::VerifyingKey;

use crate::Hash;

/// The single deployment mode this auditor implements, per the wire
/// format's mode byte.
const MODE_THIRD_PARTY_AUDITING: u8 = 0x03;

/// Static public configuration identifying the service and this auditor.
pub struct PublicConfig {
    /// The Ed25519 signing public key owned by the service operator.
    pub sig_key: VerifyingKey,
    /// The Ed25519 ECVRF public key owned by the service operator.
    pub vrf_key: VerifyingKey,
    /// This auditor's own Ed25519 signing public key.
    pub auditor_key: VerifyingKey,
}

impl PublicConfig {
    /// Encodes a tree head for signing at a given time: a fixed-layout,
    /// big-endian payload of ciphersuite, mode, three length-prefixed
    /// 32-byte Ed25519 public keys, tree size, timestamp, and log root.
    ///
    /// Exposed publicly so a third party holding this auditor's public key
    /// can reconstruct the exact signed payload and verify a tree head
    /// independently of this crate.
    pub fn encode_at_time(&self, head: Hash, size: u64, timestamp_ms: i64) -> Vec<u8> {
        let mut msg = Vec::with_capacity(153);
        msg.extend_from_slice(&[0, 0]); // ciphersuite
        msg.push(MODE_THIRD_PARTY_AUDITING);

        for key in [&self.sig_key, &self.vrf_key, &self.auditor_key] {
            let bytes = key.as_bytes();
            msg.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            msg.extend_from_slice(bytes);
        }

        msg.extend_from_slice(&size.to_be_bytes());
        msg.extend_from_slice(&timestamp_ms.to_be_bytes());
        msg.extend_from_slice(head.as_slice());

        msg
    }
}
