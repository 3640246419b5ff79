use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tlog_types::Digest;

/// Side of a sibling in a Merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Classical binary SHA-256 Merkle tree over content digests.
///
/// This is the root placed in a record's censorship record. It has no leaf
/// or node prefixes: a parent is `SHA-256(left || right)` and an odd node at
/// any level is paired with itself. It is deliberately distinct from the
/// log's RFC 6962 tree hash ([`crate::LogHasher`]).
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Digest,
    leaves: Vec<Digest>,
    /// Level 0 = leaves, last element = root.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a Merkle tree from leaf digests.
    ///
    /// An empty list produces a null root. A single leaf is its own root.
    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        if leaves.is_empty() {
            return Self {
                root: Digest::null(),
                leaves: vec![],
                levels: vec![],
            };
        }

        let mut levels: Vec<Vec<Digest>> = vec![leaves.clone()];
        let mut current = leaves.clone();

        while current.len() > 1 {
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| match pair {
                    [l, r] => hash_pair(l, r),
                    [only] => hash_pair(only, only),
                    _ => unreachable!("chunks(2) yields one or two elements"),
                })
                .collect();
            levels.push(next.clone());
            current = next;
        }

        Self {
            root: current[0],
            leaves,
            levels,
        }
    }

    /// Root over `digests` without keeping the tree around.
    pub fn root_of(digests: &[Digest]) -> Digest {
        Self::from_leaves(digests.to_vec()).root()
    }

    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Generate an inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() || self.levels.is_empty() {
            return None;
        }

        let mut path = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            // Odd level: the last node is its own sibling.
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            let side = if idx % 2 == 0 {
                Side::Right
            } else {
                Side::Left
            };
            path.push((sibling, side));
            idx /= 2;
        }

        Some(MerkleProof {
            leaf: self.leaves[index],
            path,
            root: self.root,
        })
    }
}

/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf: Digest,
    /// (sibling, side) pairs from leaf to root.
    pub path: Vec<(Digest, Side)>,
    pub root: Digest,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf;
        for (sibling, side) in &self.path {
            current = match side {
                Side::Left => hash_pair(sibling, &current),
                Side::Right => hash_pair(&current, sibling),
            };
        }
        current == self.root
    }
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(seed: u8) -> Digest {
        Digest::of(&[seed])
    }

    #[test]
    fn empty_tree_has_null_root() {
        let tree = MerkleTree::from_leaves(vec![]);
        assert!(tree.root().is_null());
        assert_eq!(tree.leaf_count(), 0);
    }

    #[test]
    fn single_leaf_is_root() {
        // A record with only index.md has the file digest as its merkle root.
        let d = Digest::from_hex(
            "22e88c7d6da9b73fbb515ed6a8f6d133c680527a799e3069ca7ce346d90649b2",
        )
        .unwrap();
        assert_eq!(MerkleTree::root_of(&[d]), d);
    }

    #[test]
    fn two_leaves_hash_concatenation() {
        let (a, b) = (leaf(1), leaf(2));
        let mut cat = a.as_bytes().to_vec();
        cat.extend_from_slice(b.as_bytes());
        assert_eq!(MerkleTree::root_of(&[a, b]), Digest::of(&cat));
    }

    #[test]
    fn odd_leaf_is_paired_with_itself() {
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(MerkleTree::root_of(&[a, b, c]), expected);
    }

    #[test]
    fn proof_verifies_for_all_leaves() {
        let leaves: Vec<Digest> = (0..7).map(leaf).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());

        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof(i).expect("proof should exist");
            assert_eq!(proof.leaf, *l);
            assert!(proof.verify(), "proof for leaf {i} should verify");
        }
    }

    #[test]
    fn proof_out_of_bounds_returns_none() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2)]);
        assert!(tree.proof(5).is_none());
    }

    #[test]
    fn tampered_proof_fails_verification() {
        let tree = MerkleTree::from_leaves(vec![leaf(1), leaf(2), leaf(3), leaf(4)]);
        let mut proof = tree.proof(0).unwrap();
        proof.leaf = leaf(99);
        assert!(!proof.verify());
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            MerkleTree::root_of(&[leaf(1), leaf(2)]),
            MerkleTree::root_of(&[leaf(2), leaf(1)])
        );
    }
}
