use serde::{Deserialize, Serialize};
use tlog_crypto::{LogHasher, Signature, VerifyingKey};
use tlog_types::Digest;

use crate::error::{LogError, LogResult};

/// A leaf as submitted for append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafInput {
    pub value: Vec<u8>,
    pub extra_data: Vec<u8>,
}

impl LeafInput {
    pub fn new(value: impl Into<Vec<u8>>, extra_data: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            extra_data: extra_data.into(),
        }
    }

    /// The merkle leaf hash the log will assign to this input.
    pub fn merkle_leaf_hash(&self) -> Digest {
        LogHasher::leaf_hash(&self.value)
    }
}

/// A leaf committed to a tree. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLeaf {
    pub value: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub merkle_leaf_hash: Digest,
    /// Position in the tree, assigned in strict append order from 0.
    pub index: i64,
}

/// Per-leaf outcome of an append.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeafStatus {
    Ok,
    Rejected(String),
}

/// Outcome of one leaf in an append batch, with its inclusion proof in the
/// returned root when the leaf was committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedLeafProof {
    pub leaf: LogLeaf,
    pub status: LeafStatus,
    pub inclusion_proof: Vec<Digest>,
}

impl QueuedLeafProof {
    pub fn is_ok(&self) -> bool {
        self.status == LeafStatus::Ok
    }
}

/// The state of a tree at some size.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRoot {
    pub tree_size: u64,
    pub root_hash: Digest,
    pub timestamp_nanos: u64,
}

impl LogRoot {
    pub fn to_bytes(&self) -> LogResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LogError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> LogResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| LogError::Serialization(e.to_string()))
    }
}

/// A log root signed by the log service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLogRoot {
    /// JSON-encoded [`LogRoot`]. These exact bytes are what was signed.
    pub log_root: Vec<u8>,
    pub signature: Signature,
}

impl SignedLogRoot {
    pub fn decode(&self) -> LogResult<LogRoot> {
        LogRoot::from_bytes(&self.log_root)
    }

    /// Check the service signature, then decode.
    pub fn verify(&self, key: &VerifyingKey) -> LogResult<LogRoot> {
        key.verify(&self.log_root, &self.signature)
            .map_err(|e| LogError::BadSignature(e.to_string()))?;
        self.decode()
    }
}

/// Result of appending a batch of leaves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendResult {
    /// One entry per submitted leaf, in submission order.
    pub proofs: Vec<QueuedLeafProof>,
    pub root: LogRoot,
}

impl AppendResult {
    /// Proofs for leaves the log refused.
    pub fn rejected(&self) -> impl Iterator<Item = &QueuedLeafProof> {
        self.proofs.iter().filter(|p| !p.is_ok())
    }
}
