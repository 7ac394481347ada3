//! Third-party auditor core for a key-transparency service.
//!
//! The service maintains a sparse prefix tree (keyed by VRF commitment) and
//! an append-only log tree chronicling every update. This crate replays both
//! trees in condensed form from a stream of update proofs and produces
//! periodic signed tree heads.

use crypto_common::OutputSizeUser;
use generic_array::GenericArray;
use sha2::Sha256;

pub mod auditor;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod prefix;
pub mod state;
pub mod storage;
pub mod transparency;

/// Network message definitions for the transport RPCs.
pub mod proto {
    pub mod transparency {
        include!(concat!(env!("OUT_DIR"), "/transparency.rs"));
    }
    pub mod kt {
        include!(concat!(env!("OUT_DIR"), "/kt.rs"));
    }
}

pub use error::AuditError;
pub use transparency::AuditTrees;

/// A SHA-256 digest.
pub(crate) type Hash = GenericArray<u8, <Sha256 as OutputSizeUser>::OutputSize>;
/// A 256-bit VRF commitment index, used to navigate the prefix tree.
pub(crate) type Index = [u8; 32];
/// A 128-bit seed used to derive stand-in hashes for an untouched subtree.
pub(crate) type Seed = [u8; 16];

/// Converts a byte vector into a 32-byte hash, failing on any other length.
pub(crate) fn try_into_hash(bytes: Vec<u8>) -> Result<Hash, AuditError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AuditError::InvariantViolation("hash must be 32 bytes".into()))?;
    Ok(arr.into())
}
