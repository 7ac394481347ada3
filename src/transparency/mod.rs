//! [`AuditTrees`] combines the condensed prefix and log trees into the
//! single structure the auditor replays update-by-update.
//!
//! Each applied update produces one log leaf: the pair of the prefix tree's
//! new root and the update's commitment to the public key it registers.

use std::mem;

use sha2::{Digest, Sha256};

use crate::error::AuditError;
use crate::log::{CondensedLogTree, LogTreeNode};
use crate::prefix::CondensedPrefixTree;
use crate::proto::transparency::AuditorUpdate;
use crate::{Hash, try_into_hash};

#[derive(Debug, Default)]
pub struct AuditTrees {
    prefix: CondensedPrefixTree,
    log: CondensedLogTree,
}

impl AuditTrees {
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Reconstructs the combined trees from a persisted [`crate::state::AuditorState`].
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvariantViolation`] if `log_nodes` doesn't
    /// match the claimed tree size.
    pub fn from_parts(
        current_prefix_root: Hash,
        total_updates_processed: u64,
        log_nodes: Vec<LogTreeNode>,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            prefix: CondensedPrefixTree::from_parts(current_prefix_root, total_updates_processed),
            log: CondensedLogTree::from_persisted(log_nodes, total_updates_processed)?,
        })
    }

    pub fn total_updates_processed(&self) -> u64 {
        self.prefix.size()
    }

    pub fn is_initialized(&self) -> bool {
        self.prefix.is_initialized()
    }

    pub fn current_prefix_root(&self) -> Option<Hash> {
        self.prefix.root()
    }

    pub fn log_root(&self) -> Option<Hash> {
        self.log.root_hash()
    }

    pub fn log_nodes(&self) -> &[LogTreeNode] {
        self.log.nodes()
    }

    /// Applies one update: verifies it against the current prefix root,
    /// derives the new prefix root, then appends the corresponding log
    /// leaf.
    pub fn apply_update(&mut self, mut update: AuditorUpdate) -> Result<(), AuditError> {
        // The commitment isn't consumed by the prefix tree itself.
        let commitment = try_into_hash(mem::take(&mut update.commitment))?;

        self.prefix.apply_update(update.try_into()?)?;
        let prefix_root = self.prefix.root().ok_or(AuditError::InvariantViolation(
            "prefix tree uninitialized after a successful update".into(),
        ))?;

        self.log.append_leaf(log_leaf(prefix_root, commitment));
        Ok(())
    }
}

fn log_leaf(prefix_root: Hash, commitment: Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(prefix_root);
    hasher.update(commitment);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::transparency::auditor_proof::Proof;
    use crate::proto::transparency::{AuditorProof, AuditorUpdate};

    #[test]
    fn new_tree_then_same_key_advances_both_trees() {
        let mut trees = AuditTrees::new_empty();
        assert!(!trees.is_initialized());

        trees
            .apply_update(AuditorUpdate {
                real: true,
                index: [0u8; 32].to_vec(),
                seed: [0u8; 16].to_vec(),
                commitment: [1u8; 32].to_vec(),
                proof: Some(AuditorProof {
                    proof: Some(Proof::NewTree(Default::default())),
                }),
            })
            .unwrap();

        assert!(trees.is_initialized());
        assert_eq!(trees.total_updates_processed(), 1);
        assert_eq!(trees.log_nodes().len(), 1);
        assert!(trees.log_root().is_some());
    }

    #[test]
    fn rejects_update_missing_a_32_byte_commitment() {
        let mut trees = AuditTrees::new_empty();
        let err = trees
            .apply_update(AuditorUpdate {
                real: true,
                index: [0u8; 32].to_vec(),
                seed: [0u8; 16].to_vec(),
                commitment: vec![1u8; 4],
                proof: Some(AuditorProof {
                    proof: Some(Proof::NewTree(Default::default())),
                }),
            })
            .unwrap_err();
        assert!(matches!(err, AuditError::InvariantViolation(_)));
    }
}
