//! The condensed prefix tree is a binary prefix Merkle tree.
//!
//! The tree maps an `Index` to a leaf that tracks
//! - `counter`: version of the leaf, incremented each time the index is updated
//! - `position`: the index in the top-level log at which the index was _first_ inserted
//!
//! Rather than using variable-depth leaves, all leaves are located at the lowest
//! level of the tree (256). The copath of a leaf is generated pseudorandomly at
//! the time of insertion. Nodes filled in this way are called "stand-in" hashes.
//!
//! When inserting a new leaf, a non-inclusion proof is provided, terminating at
//! the first stand-in hash on the leaf's direct path. Applying the update
//! verifies the non-inclusion proof against the current root, then replaces the
//! stand-in hash with a fresh subtree containing the new leaf.
//!
//! When incrementing the counter of a leaf, an inclusion proof is provided for
//! the existing leaf. Applying the update verifies the inclusion proof against
//! the current root, then updates the leaf with the new counter, retaining the
//! original position.
//!
//! A "fake" update replaces a stand-in hash with a different stand-in hash,
//! rather than with a real leaf. This is used to mask the metadata of real
//! updates from an observer of the update stream.

use sha2::{Digest, Sha256};

use crate::error::AuditError;
use crate::proto::transparency::AuditorUpdate;
use crate::proto::transparency::auditor_proof::{DifferentKey, Proof, SameKey};
use crate::{Hash, Index, Seed, try_into_hash};

/// The condensed prefix tree: just the current root and how many updates
/// have been folded into it.
#[derive(Debug)]
pub struct CondensedPrefixTree {
    pub(crate) root: Hash,
    pub(crate) size: u64,
}

impl Default for CondensedPrefixTree {
    fn default() -> Self {
        Self::new()
    }
}

/// An update to the prefix tree, decoded off the wire but not yet applied.
#[derive(Debug)]
pub(crate) enum PrefixUpdate {
    /// A new tree is created with a single initial real leaf.
    NewTree { index: Index, seed: Seed },
    /// Either a stand-in is replaced with a real leaf, or a stand-in is
    /// replaced with a different stand-in.
    DifferentKey {
        real: bool,
        index: Index,
        seed: Seed,
        old_seed: Seed,
        copath: Vec<Hash>,
    },
    /// A real leaf's counter is incremented.
    SameKey {
        index: Index,
        copath: Vec<Hash>,
        seed: Seed,
        counter: u32,
        position: u64,
    },
}

impl TryFrom<AuditorUpdate> for PrefixUpdate {
    type Error = AuditError;

    fn try_from(update: AuditorUpdate) -> Result<Self, Self::Error> {
        let proof = update
            .proof
            .and_then(|x| x.proof)
            .ok_or(AuditError::invalid_proof("update is missing a proof"))?;

        let invalid_index = || AuditError::InvariantViolation("index must be 32 bytes".into());
        let invalid_seed = || AuditError::InvariantViolation("seed must be 16 bytes".into());

        match proof {
            Proof::NewTree(_) => {
                // New trees always start with one real leaf.
                if !update.real {
                    return Err(AuditError::invalid_proof("NewTree on a fake update"));
                }
                Ok(PrefixUpdate::NewTree {
                    index: update.index.try_into().map_err(|_| invalid_index())?,
                    seed: update.seed.try_into().map_err(|_| invalid_seed())?,
                })
            }
            Proof::DifferentKey(DifferentKey { copath, old_seed }) => Ok(PrefixUpdate::DifferentKey {
                real: update.real,
                index: update.index.try_into().map_err(|_| invalid_index())?,
                seed: update.seed.try_into().map_err(|_| invalid_seed())?,
                old_seed: old_seed
                    .try_into()
                    .map_err(|_| AuditError::InvariantViolation("old_seed must be 16 bytes".into()))?,
                copath: copath
                    .into_iter()
                    .map(try_into_hash)
                    .collect::<Result<Vec<_>, _>>()?,
            }),
            Proof::SameKey(SameKey {
                copath,
                counter,
                position,
            }) => {
                // Real leaves cannot be replaced with a fake update.
                if !update.real {
                    return Err(AuditError::invalid_proof("SameKey on a fake update"));
                }

                Ok(PrefixUpdate::SameKey {
                    index: update.index.try_into().map_err(|_| invalid_index())?,
                    copath: copath
                        .into_iter()
                        .map(try_into_hash)
                        .collect::<Result<Vec<_>, _>>()?,
                    seed: update.seed.try_into().map_err(|_| invalid_seed())?,
                    counter,
                    position,
                })
            }
        }
    }
}

impl CondensedPrefixTree {
    /// Creates a new, empty prefix tree.
    pub fn new() -> Self {
        Self {
            root: Hash::default(),
            size: 0,
        }
    }

    pub fn from_parts(root: Hash, size: u64) -> Self {
        Self { root, size }
    }

    pub fn is_initialized(&self) -> bool {
        self.size > 0
    }

    pub fn root(&self) -> Option<Hash> {
        self.is_initialized().then_some(self.root)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Applies an update, verifying it against the current root before
    /// replacing it with the root the update proves.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::InvalidProof`] if the update's starting proof
    /// does not verify against the current root, or is structurally
    /// impossible given the update's real/fake flag and the tree's current
    /// initialization state.
    pub(crate) fn apply_update(&mut self, update: PrefixUpdate) -> Result<(), AuditError> {
        let proof = match update {
            PrefixUpdate::NewTree { index, seed } => {
                if self.is_initialized() {
                    return Err(AuditError::invalid_proof("NewTree on an initialized tree"));
                }

                PrefixProof::real(
                    &PrefixLeaf {
                        index,
                        counter: 0,
                        position: 0,
                    },
                    &[],
                    &seed,
                )
            }
            PrefixUpdate::SameKey {
                index,
                copath,
                seed,
                counter,
                position,
            } => {
                if !self.is_initialized() {
                    return Err(AuditError::invalid_proof("first proof must be NewTree"));
                }

                let starting = PrefixProof::real(
                    &PrefixLeaf {
                        index,
                        counter,
                        position,
                    },
                    &copath,
                    &seed,
                )?;

                let derived = starting.compute_root();
                if derived != self.root {
                    return Err(AuditError::root_mismatch(self.root, derived));
                }

                PrefixProof::real(
                    &PrefixLeaf {
                        index,
                        counter: counter + 1,
                        // the key's original log position never changes
                        position,
                    },
                    &copath,
                    &seed,
                )
            }
            PrefixUpdate::DifferentKey {
                real,
                index,
                seed,
                old_seed,
                copath,
            } => {
                if !self.is_initialized() {
                    return Err(AuditError::invalid_proof("first proof must be NewTree"));
                }

                // DifferentKey updates always replace a stand-in; the proof
                // is a non-inclusion proof terminating at that stand-in.
                let starting = PrefixProof::fake(&index, &copath, &old_seed)?;

                let derived = starting.compute_root();
                if derived != self.root {
                    return Err(AuditError::root_mismatch(self.root, derived));
                }

                if real {
                    PrefixProof::real(
                        &PrefixLeaf {
                            index,
                            counter: 0,
                            position: self.size,
                        },
                        &copath,
                        &seed,
                    )
                } else {
                    PrefixProof::fake(&index, &copath, &seed)
                }
            }
        };

        self.root = proof?.compute_root();
        self.size += 1;

        Ok(())
    }
}

struct PrefixLeaf {
    index: Index,
    position: u64, // the index of the first log entry in which this leaf appeared
    counter: u32,  // the version of this leaf
}

fn leaf_hash(leaf: &PrefixLeaf) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(leaf.index);
    hasher.update(leaf.counter.to_be_bytes());
    hasher.update(leaf.position.to_be_bytes());
    hasher.finalize()
}

fn stand_in_hash(seed: &Seed, level: u8) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x02]);
    hasher.update(seed);
    hasher.update([level]);
    hasher.finalize()
}

fn parent_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize()
}

/// A proof that `value` appears along the direct path to `index`, at height
/// `copath.len()` in the tree.
struct PrefixProof {
    value: Hash,
    index: Index,
    copath: Vec<Hash>,
}

impl PrefixProof {
    /// A proof for a stand-in replacement: the insertion replaces the
    /// stand-in along the direct path to `index` at height `copath.len()`.
    fn fake(index: &Index, copath: &[Hash], seed: &Seed) -> Result<Self, AuditError> {
        let level: u8 = (copath.len().checked_sub(1))
            .and_then(|l| u8::try_from(l).ok())
            .ok_or(AuditError::InvariantViolation("copath too short or too long".into()))?;

        Ok(Self {
            value: stand_in_hash(seed, level),
            index: index.to_owned(),
            copath: copath.to_owned(),
        })
    }

    /// A proof for a new leaf insertion, with its copath filled out to the
    /// full depth using stand-ins pseudorandomly derived from `seed`.
    fn real(leaf: &PrefixLeaf, copath: &[Hash], seed: &Seed) -> Result<Self, AuditError> {
        if copath.len() > 256 {
            return Err(AuditError::InvariantViolation("copath longer than 256".into()));
        }

        let mut copath = copath.to_vec();
        for i in copath.len()..256 {
            copath.push(stand_in_hash(seed, i as u8));
        }

        Ok(Self {
            value: leaf_hash(leaf),
            index: leaf.index,
            copath,
        })
    }

    /// Ascends from height `copath.len()` to the root.
    fn compute_root(&self) -> Hash {
        let mut node = self.value;
        let index = self.index;
        for i in (0..self.copath.len()).rev() {
            if index[i / 8] >> (7 - (i % 8)) & 1 == 0 {
                node = parent_hash(&node, &self.copath[i]);
            } else {
                node = parent_hash(&self.copath[i], &node);
            }
        }

        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex::ToHex;
    use hex_literal::hex;

    use aes::Aes128;
    use aes::cipher::{BlockEncrypt, KeyInit};
    use generic_array::GenericArray;

    use crate::proto::transparency::auditor_proof::{DifferentKey, Proof};
    use crate::proto::transparency::{AuditorProof, AuditorUpdate};

    fn seed(position: u64) -> Seed {
        // Encrypt `position` under an all-zero AES-128 key, to get a
        // pseudorandom but reproducible 16-byte seed for each test vector.
        let mut buffer = GenericArray::default();
        buffer[8..].copy_from_slice(&position.to_be_bytes());
        let aes = Aes128::new(&[0u8; 16].into());
        aes.encrypt_block(&mut buffer);
        buffer.into()
    }

    #[test]
    fn new_tree() {
        let index = Index::default();
        let seed = seed(0);
        let expected_root =
            hex!("6eefbfcdf7b929b73963cb21eb882a2a3e49e8958fe25795df82d099e551915c").into();

        let mut tree = CondensedPrefixTree::new();
        tree.apply_update(PrefixUpdate::NewTree { index, seed }).unwrap();
        assert_eq!(
            tree.root,
            expected_root,
            "expected root {:?}, got {:?}",
            expected_root.encode_hex::<String>(),
            tree.root.encode_hex::<String>()
        );
        assert_eq!(tree.size, 1);
    }

    #[test]
    fn real_update_replacing_a_stand_in() {
        let mut index = Index::default().to_vec();
        index[0] = 0x80;
        let old_seed = seed(0);
        let seed = seed(1).to_vec();
        let commitment = Hash::default().to_vec();
        let old_root =
            hex!("6eefbfcdf7b929b73963cb21eb882a2a3e49e8958fe25795df82d099e551915c").into();
        let expected_root =
            hex!("55a94bcb3a3958a83fab0053bdb553b4774b19a6516ac7fe0811a498396c2d36").into();

        let copath =
            vec![hex!("33819dcecb822883dd9e134325f28ba79d114fe69bb33a09d9755c6507fe22e7").into()];

        let update = AuditorUpdate {
            real: true,
            index,
            seed,
            commitment,
            proof: Some(AuditorProof {
                proof: Some(Proof::DifferentKey(DifferentKey {
                    copath,
                    old_seed: old_seed.to_vec(),
                })),
            }),
        }
        .try_into()
        .unwrap();

        let mut tree = CondensedPrefixTree::from_parts(old_root, 1);
        tree.apply_update(update).unwrap();

        assert_eq!(
            tree.root,
            expected_root,
            "expected root {:?}, got {:?}",
            expected_root.encode_hex::<String>(),
            tree.root.encode_hex::<String>()
        );
        assert_eq!(tree.size, 2);
    }

    #[test]
    fn fake_update_replacing_a_stand_in() {
        let mut index: Vec<u8> = Index::default().into();
        index[0] = 0xc0;
        let commitment = Hash::default().to_vec();
        let old_root =
            hex!("55a94bcb3a3958a83fab0053bdb553b4774b19a6516ac7fe0811a498396c2d36").into();
        let expected_root =
            hex!("82c7616b35828d31468590ecec7e3b62a31c7ec7a6874229da90a9cebf28a1df").into();

        let copath = vec![
            hex!("33819dcecb822883dd9e134325f28ba79d114fe69bb33a09d9755c6507fe22e7").into(),
            hex!("a7d0256b66a95ad4a8f9efed2ee9f060cc50c32336223063c30483dda33f0408").into(),
        ];

        let update = AuditorUpdate {
            real: false,
            index,
            seed: seed(2).into(),
            commitment,
            proof: Some(AuditorProof {
                proof: Some(Proof::DifferentKey(DifferentKey {
                    copath,
                    old_seed: seed(1).into(),
                })),
            }),
        }
        .try_into()
        .unwrap();

        let mut tree = CondensedPrefixTree::from_parts(old_root, 2);
        tree.apply_update(update).unwrap();

        assert_eq!(
            tree.root,
            expected_root,
            "expected root {:?}, got {:?}",
            expected_root.encode_hex::<String>(),
            tree.root.encode_hex::<String>()
        );
        assert_eq!(tree.size, 3);
    }

    #[test]
    fn new_tree_rejects_fake_update() {
        let err = PrefixUpdate::try_from(AuditorUpdate {
            real: false,
            index: Index::default().to_vec(),
            seed: Seed::default().to_vec(),
            commitment: Hash::default().to_vec(),
            proof: Some(AuditorProof {
                proof: Some(Proof::NewTree(Default::default())),
            }),
        })
        .unwrap_err();
        assert!(matches!(err, AuditError::InvalidProof { .. }));
    }

    #[test]
    fn same_key_on_fake_update_is_rejected() {
        let err = PrefixUpdate::try_from(AuditorUpdate {
            real: false,
            index: Index::default().to_vec(),
            seed: Seed::default().to_vec(),
            commitment: Hash::default().to_vec(),
            proof: Some(AuditorProof {
                proof: Some(Proof::SameKey(SameKey {
                    copath: vec![],
                    counter: 0,
                    position: 0,
                })),
            }),
        })
        .unwrap_err();
        assert!(matches!(err, AuditError::InvalidProof { .. }));
    }

    #[test]
    fn tampered_starting_root_is_rejected() {
        let mut index = Index::default().to_vec();
        index[0] = 0x80;
        let mut tampered_root: Hash =
            hex!("6eefbfcdf7b929b73963cb21eb882a2a3e49e8958fe25795df82d099e551915c").into();
        tampered_root[0] ^= 0x01;

        let update = AuditorUpdate {
            real: true,
            index,
            seed: seed(1).to_vec(),
            commitment: Hash::default().to_vec(),
            proof: Some(AuditorProof {
                proof: Some(Proof::DifferentKey(DifferentKey {
                    copath: vec![
                        hex!("33819dcecb822883dd9e134325f28ba79d114fe69bb33a09d9755c6507fe22e7")
                            .into(),
                    ],
                    old_seed: seed(0).to_vec(),
                })),
            }),
        }
        .try_into()
        .unwrap();

        let mut tree = CondensedPrefixTree::from_parts(tampered_root, 1);
        let err = tree.apply_update(update).unwrap_err();
        assert!(matches!(
            err,
            AuditError::InvalidProof {
                reason: "starting root mismatch",
                ..
            }
        ));
    }
}
