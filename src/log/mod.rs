//! The condensed log tree is a binary left-balanced Merkle tree.
//!
//! Leaves are appended left to right. Only the roots of the maximal complete
//! subtrees along the tree's right edge are ever retained; everything else
//! is derivable from them. This is the same representation an append-only
//! certificate-transparency-style log uses to support efficient consistency
//! and inclusion proofs, condensed down to exactly what this auditor needs:
//! the ability to recompute the tree head after replaying another batch of
//! leaves, and to persist just enough state to resume later.
//!
//! For example, the log
//!
//! ```text
//!     (*)
//!   /   \
//!  *     *
//! / \   / \
//! 0 1 2 3 4
//! ```
//!
//! evolves into:
//!
//! ```text
//!         *
//!       /  \
//!     (*)   (5)
//!   /   \
//!  *     *
//! / \   / \
//! 0 1 2 3 4
//! ```
//!
//! which evolves into:
//!
//! ```text
//!          *
//!       /    \
//!     (*)     (*)
//!   /   \    /   \
//!  *     *  5     6
//! / \   / \
//! 0 1 2 3 4
//! ```
//!
//! where `(_)` denotes a retained maximal subtree root and the numbers along
//! the bottom are leaf *positions*, left to right — not ids.
//!
//! Every retained node is addressed by a stable `id`, distinct from its
//! leaf position: leaves sit at even ids (`0, 2, 4, …`) and intermediate
//! nodes at odd ids, so that the condensed set of nodes can be persisted
//! and later checked against the tree size it claims to represent, rather
//! than trusted blindly on reload.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Hash;
use crate::error::AuditError;

/// A retained node: the root of one of the tree's maximal complete
/// subtrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTreeNode {
    pub id: u64,
    pub hash: Hash,
}

/// Leaves sit at even ids (`0, 2, 4, …`); intermediate nodes sit at odd ids.
/// For `n` leaves, the most recently appended leaf has id `max_leaf_id =
/// 2·(n−1)`, and every other id in play is bounded by it. An id is fully
/// recoverable from its structural role and the current `max_leaf_id`,
/// independent of insertion order, which is what lets
/// [`CondensedLogTree::from_persisted`] check a loaded node set against the
/// tree size it's meant to represent.
pub fn is_leaf(id: u64) -> bool {
    id % 2 == 0
}

/// Height above the leaves: 0 for a leaf, otherwise the number of trailing
/// one-bits of `id` (equivalently, the trailing zeros of `!id`).
pub fn level(id: u64) -> u32 {
    if is_leaf(id) { 0 } else { (!id).trailing_zeros() }
}

/// The id one level below `id`, on the left. Undefined for a leaf.
pub fn left_child(id: u64) -> u64 {
    id - (1u64 << (level(id) - 1))
}

/// The id one level below `id`, on the right, folded back down to the
/// current frontier if the naive sibling id would run past `max_leaf`.
/// Undefined for a leaf.
pub fn right_child(id: u64, max_leaf: u64) -> u64 {
    let mut candidate = id + (1u64 << (level(id) - 1));
    while candidate > max_leaf {
        candidate = left_child(candidate);
    }
    candidate
}

/// The id of the top of the conceptual complete tree bounding `max_leaf`:
/// 0 if there are no further leaves, otherwise one less than the highest
/// power of two not exceeding `max_leaf`. This need not be a maximal
/// *complete* subtree root when `max_leaf + 1` isn't a power of two — see
/// [`full_subtree_root_ids`] for the ids actually retained.
pub fn root(max_leaf: u64) -> u64 {
    if max_leaf == 0 {
        0
    } else {
        (1u64 << (u64::BITS - 1 - max_leaf.leading_zeros())) - 1
    }
}

/// Descends from the top of the tree, choosing the child whose subtree
/// would contain `id`, until the next step would land on `id` itself.
/// Returns `None` for the top id, which has no parent.
pub fn parent(id: u64, max_leaf: u64) -> Option<u64> {
    let top = root(max_leaf);
    if id == top {
        return None;
    }

    let mut current = top;
    loop {
        let l = left_child(current);
        let r = right_child(current, max_leaf);
        if l == id || r == id {
            return Some(current);
        }
        current = if id < current { l } else { r };
    }
}

/// True if the complete subtree `id` names lies entirely within the first
/// `max_leaf + 1` leaves, and so will never change as more leaves are
/// appended.
pub fn is_full_subtree(id: u64, max_leaf: u64) -> bool {
    id + (1u64 << level(id)) - 1 <= max_leaf
}

/// The ids of the maximal complete subtree roots that together cover
/// exactly the leaves up to `max_leaf`, ordered left to right. This is the
/// minimal set of nodes [`CondensedLogTree`] needs to retain.
pub fn full_subtree_root_ids(max_leaf: u64) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut current = root(max_leaf);
    loop {
        if is_full_subtree(current, max_leaf) {
            ids.push(current);
            break;
        }
        ids.push(left_child(current));
        current = right_child(current, max_leaf);
    }
    ids
}

/// The condensed log tree: the current size and the maximal complete
/// subtree roots needed to recompute the head or append further leaves.
#[derive(Debug, Clone, Default)]
pub struct CondensedLogTree {
    n_leaves: u64,
    // left to right, by construction: each append only ever extends or
    // merges nodes at the tail.
    peaks: Vec<LogTreeNode>,
}

impl CondensedLogTree {
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Rebuilds a condensed log tree from a persisted node set.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvariantViolation`] if the node ids don't
    /// exactly match the maximal complete subtree roots expected for a log
    /// of size `n_entries`.
    pub fn from_persisted(mut nodes: Vec<LogTreeNode>, n_entries: u64) -> Result<Self, AuditError> {
        let mut expected = if n_entries == 0 {
            Vec::new()
        } else {
            full_subtree_root_ids(2 * (n_entries - 1))
        };
        expected.sort_unstable();
        nodes.sort_unstable_by_key(|n| n.id);

        let actual: Vec<u64> = nodes.iter().map(|n| n.id).collect();
        if actual != expected {
            return Err(AuditError::InvariantViolation(
                "persisted log nodes do not match the claimed tree size".into(),
            ));
        }

        Ok(Self {
            n_leaves: n_entries,
            peaks: nodes,
        })
    }

    pub fn size(&self) -> u64 {
        self.n_leaves
    }

    /// The node set that should be persisted to resume from this point.
    pub fn nodes(&self) -> &[LogTreeNode] {
        &self.peaks
    }

    /// Appends a new leaf, merging it into the existing peaks wherever two
    /// adjacent peaks of the same size now exist.
    pub(crate) fn append_leaf(&mut self, leaf: Hash) {
        let max_leaf = 2 * self.n_leaves;
        let mut node = LogTreeNode { id: max_leaf, hash: leaf };

        while let Some(top) = self.peaks.last() {
            if level(top.id) != level(node.id) {
                break;
            }
            let top = self.peaks.pop().unwrap();
            node = LogTreeNode {
                id: parent(top.id, max_leaf).expect("a node just merged with a sibling is never the tree's top"),
                hash: pair_hash(level(top.id), &top.hash, level(node.id), &node.hash),
            };
        }

        self.peaks.push(node);
        self.n_leaves += 1;
    }

    /// Folds the retained peaks into the tree head, right to left: the
    /// smallest (rightmost) peak is combined with its immediate left
    /// neighbor, and so on until the leftmost, largest peak is folded in.
    pub fn root_hash(&self) -> Option<Hash> {
        let mut peaks = self.peaks.iter().rev();
        let last = peaks.next()?;
        let mut acc_hash = last.hash;
        let mut acc_size = 1u64 << level(last.id);

        for node in peaks {
            let node_size = 1u64 << level(node.id);
            acc_hash = pair_hash_sized(node_size, &node.hash, acc_size, &acc_hash);
            acc_size += node_size;
        }

        Some(acc_hash)
    }
}

fn pair_hash(left_level: u32, left: &Hash, right_level: u32, right: &Hash) -> Hash {
    pair_hash_sized(1u64 << left_level, left, 1u64 << right_level, right)
}

/// Hashes two sibling subtree roots together, tagging each with whether it
/// covers more than a single leaf.
fn pair_hash_sized(left_size: u64, left: &Hash, right_size: u64, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(node_bytes(left_size, left));
    hasher.update(node_bytes(right_size, right));
    hasher.finalize()
}

/// Serializes a node as a 33-byte array: a leading byte that is 1 if the
/// node is not itself a leaf, followed by the 32-byte root hash.
fn node_bytes(size: u64, hash: &Hash) -> [u8; 33] {
    let mut buf = [0u8; 33];
    buf[0] = (size != 1) as u8;
    buf[1..].copy_from_slice(hash.as_slice());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use generic_array::GenericArray;
    use hex::decode;
    use sha2::digest::OutputSizeUser;

    fn generic_hex(hex: &str) -> Hash {
        let mut arr: GenericArray<u8, <Sha256 as OutputSizeUser>::OutputSize> = GenericArray::default();
        arr.copy_from_slice(&decode(hex).unwrap());
        arr
    }

    #[test]
    fn three_leaf_append_matches_reference_vector() {
        let mut log = CondensedLogTree::new_empty();
        let mut leaf = Hash::default();
        log.append_leaf(leaf);
        assert_eq!(log.root_hash().unwrap(), leaf);

        leaf[0] = 1;
        log.append_leaf(leaf);
        assert_eq!(
            log.root_hash().unwrap(),
            generic_hex("133f2fb2b9884f212cb981871e3a33bddd95c40fc65a43a1ab21c1011d1a48c7")
        );

        leaf[0] = 2;
        log.append_leaf(leaf);
        assert_eq!(
            log.root_hash().unwrap(),
            generic_hex("7fb7325069ae4e7dd39c974f8839e6ff988d679267d0a356073e2c99fb1e3a03")
        );
        assert_eq!(log.size(), 3);
    }

    #[test]
    fn full_subtree_root_ids_cover_size_without_overlap() {
        for n in [1u64, 2, 3, 4, 5, 7, 8, 9, 16, 17, 100] {
            let max_leaf = 2 * (n - 1);
            let ids = full_subtree_root_ids(max_leaf);
            let total: u64 = ids.iter().map(|&id| 1u64 << level(id)).sum();
            assert_eq!(total, n);
            // strictly increasing ids, left to right
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn three_leaves_retain_the_exact_spec_ids() {
        let mut log = CondensedLogTree::new_empty();
        for i in 0..3u8 {
            let mut leaf = Hash::default();
            leaf[0] = i;
            log.append_leaf(leaf);
        }
        let ids: Vec<u64> = log.nodes().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn from_persisted_matches_live_append() {
        let mut log = CondensedLogTree::new_empty();
        for i in 0..13u8 {
            let mut leaf = Hash::default();
            leaf[0] = i;
            log.append_leaf(leaf);
        }

        let reloaded = CondensedLogTree::from_persisted(log.nodes().to_vec(), log.size()).unwrap();
        assert_eq!(reloaded.root_hash(), log.root_hash());
    }

    #[test]
    fn from_persisted_rejects_mismatched_node_set() {
        let mut log = CondensedLogTree::new_empty();
        for i in 0..5u8 {
            let mut leaf = Hash::default();
            leaf[0] = i;
            log.append_leaf(leaf);
        }

        let mut nodes = log.nodes().to_vec();
        nodes.pop();
        let err = CondensedLogTree::from_persisted(nodes, log.size()).unwrap_err();
        assert!(matches!(err, AuditError::InvariantViolation(_)));
    }

    #[test]
    fn root_and_full_subtree_helpers_agree_on_power_of_two_sizes() {
        let max_leaf = 2 * (8 - 1); // 8 leaves: a single complete subtree
        assert_eq!(full_subtree_root_ids(max_leaf), vec![root(max_leaf)]);
        assert!(is_full_subtree(root(max_leaf), max_leaf));

        let uneven_max_leaf = 2 * (7 - 1); // 7 leaves: not a power of two
        assert!(!is_full_subtree(root(uneven_max_leaf), uneven_max_leaf));
    }

    #[test]
    fn child_and_parent_relations_round_trip() {
        let max_leaf = 2 * (8 - 1); // 8 leaves: a single complete subtree
        let id = root(max_leaf);
        let l = left_child(id);
        let r = right_child(id, max_leaf);
        assert_eq!(parent(l, max_leaf), Some(id));
        assert_eq!(parent(r, max_leaf), Some(id));
        assert!(parent(id, max_leaf).is_none());
        assert!(is_leaf(0));
        assert!(!is_leaf(1));
    }
}
