//! Crate-level error types.
//!
//! `InvalidProof` and `InvalidAuditorSignature` are matched on explicitly by
//! the audit loop, since they are fatal in a way a plain I/O or transport
//! error is not. Everything else that can go wrong around the loop (config
//! parsing, transport RPCs, persistence I/O) flows through `anyhow::Error`.

use std::fmt;

use crate::Hash;

/// Errors raised by the prefix and log tree cores.
#[derive(Debug)]
pub enum AuditError {
    /// A delivered proof did not verify against the auditor's current view
    /// of the prefix tree.
    InvalidProof {
        reason: &'static str,
        expected: Option<Hash>,
        derived: Option<Hash>,
    },
    /// A persisted state's self-signature did not verify under the
    /// configured auditor public key.
    InvalidAuditorSignature,
    /// A byte length, level, or persisted-node-id invariant was violated.
    /// This indicates a programming error, not an adversarial proof.
    InvariantViolation(String),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::InvalidProof {
                reason,
                expected,
                derived,
            } => {
                write!(f, "invalid proof: {reason}")?;
                if let (Some(expected), Some(derived)) = (expected, derived) {
                    write!(
                        f,
                        " (expected root {}, derived root {})",
                        hex::encode(expected),
                        hex::encode(derived)
                    )?;
                }
                Ok(())
            }
            AuditError::InvalidAuditorSignature => {
                write!(f, "persisted state failed self-signature verification")
            }
            AuditError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for AuditError {}

impl AuditError {
    pub(crate) fn invalid_proof(reason: &'static str) -> Self {
        AuditError::InvalidProof {
            reason,
            expected: None,
            derived: None,
        }
    }

    pub(crate) fn root_mismatch(expected: Hash, derived: Hash) -> Self {
        AuditError::InvalidProof {
            reason: "starting root mismatch",
            expected: Some(expected),
            derived: Some(derived),
        }
    }
}
