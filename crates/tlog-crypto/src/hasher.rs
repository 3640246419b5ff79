use sha2::{Digest as _, Sha256};
use tlog_types::Digest;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// RFC 6962 tree hasher for the append-only log.
///
/// Leaves and interior nodes are domain separated by a one-byte prefix, so a
/// leaf value can never be confused with a pair of child hashes.
pub struct LogHasher;

impl LogHasher {
    /// `SHA-256(0x00 || value)`. This is the merkle leaf hash of a log leaf
    /// and the content address of the blob the leaf points at.
    pub fn leaf_hash(value: &[u8]) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update([LEAF_PREFIX]);
        hasher.update(value);
        Digest::from_hash(hasher.finalize().into())
    }

    /// `SHA-256(0x01 || left || right)`.
    pub fn node_hash(left: &Digest, right: &Digest) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update([NODE_PREFIX]);
        hasher.update(left.as_bytes());
        hasher.update(right.as_bytes());
        Digest::from_hash(hasher.finalize().into())
    }

    /// Hash of the empty tree, `SHA-256("")`.
    pub fn empty_root() -> Digest {
        Digest::of(b"")
    }

    /// Merkle tree hash over leaf hashes in index order.
    pub fn root(leaf_hashes: &[Digest]) -> Digest {
        match leaf_hashes.len() {
            0 => Self::empty_root(),
            1 => leaf_hashes[0],
            n => {
                let k = split_point(n);
                let left = Self::root(&leaf_hashes[..k]);
                let right = Self::root(&leaf_hashes[k..]);
                Self::node_hash(&left, &right)
            }
        }
    }

    /// Audit path for the leaf at `index`, ordered from the leaf upward.
    pub fn inclusion_proof(leaf_hashes: &[Digest], index: usize) -> Option<Vec<Digest>> {
        if index >= leaf_hashes.len() {
            return None;
        }
        let mut path = Vec::new();
        audit_path(leaf_hashes, index, &mut path);
        Some(path)
    }

    /// Verify an audit path produced by [`LogHasher::inclusion_proof`].
    pub fn verify_inclusion(
        leaf_hash: &Digest,
        index: u64,
        tree_size: u64,
        proof: &[Digest],
        root: &Digest,
    ) -> bool {
        if index >= tree_size {
            return false;
        }
        let mut fnode = index;
        let mut snode = tree_size - 1;
        let mut r = *leaf_hash;
        for p in proof {
            if snode == 0 {
                return false;
            }
            if fnode & 1 == 1 || fnode == snode {
                r = Self::node_hash(p, &r);
                if fnode & 1 == 0 {
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                r = Self::node_hash(&r, p);
            }
            fnode >>= 1;
            snode >>= 1;
        }
        snode == 0 && r == *root
    }
}

/// Largest power of two strictly less than `n` (n > 1).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

fn audit_path(leaves: &[Digest], index: usize, path: &mut Vec<Digest>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if index < k {
        audit_path(&leaves[..k], index, path);
        path.push(LogHasher::root(&leaves[k..]));
    } else {
        audit_path(&leaves[k..], index - k, path);
        path.push(LogHasher::root(&leaves[..k]));
    }
}
