use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tlog_types::{Digest, TreeId};

/// The authoritative leaf set of one record state.
///
/// Every digest is the merkle leaf hash of a content leaf in the same tree,
/// which is also the key of the content's blob. `version` counts file
/// changes; `iteration` counts every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordIndex {
    pub version: u32,
    pub iteration: u32,
    pub record_metadata: Digest,
    /// Metadata stream id -> digest.
    pub metadata: BTreeMap<u64, Digest>,
    /// File name -> digest.
    pub files: BTreeMap<String, Digest>,
    #[serde(default)]
    pub frozen: bool,
    /// Successor tree after graduation; `TreeId::NONE` otherwise.
    #[serde(default = "no_tree")]
    pub tree_pointer: TreeId,
}

fn no_tree() -> TreeId {
    TreeId::NONE
}

impl RecordIndex {
    /// Every digest this index references: record metadata, then metadata
    /// streams by id, then files by name.
    pub fn digests(&self) -> Vec<Digest> {
        std::iter::once(self.record_metadata)
            .chain(self.metadata.values().copied())
            .chain(self.files.values().copied())
            .collect()
    }

    pub fn references(&self, digest: &Digest) -> bool {
        self.record_metadata == *digest
            || self.metadata.values().any(|d| d == digest)
            || self.files.values().any(|d| d == digest)
    }
}

/// Appended after the frozen record index of a tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeRecord {
    pub tree_pointer: TreeId,
}
