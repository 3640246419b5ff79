use std::collections::HashSet;

use tlog_crypto::EncryptionKey;
use tlog_store::BlobReader;
use tlog_types::{Digest, TreeId};
use tracing::{info, warn};

use crate::error::TlogResult;
use crate::leaf::{ExtraData, LeafKind};
use crate::record_index::{FreezeRecord, RecordIndex};
use crate::tlog::Tlog;

/// What a single leaf turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeafClass {
    /// Content referenced by at least one record index.
    RecordContent { descriptor: String },
    RecordIndex { version: u32, iteration: u32, frozen: bool },
    FreezeRecord { tree_pointer: TreeId },
    Anchor,
    Plugin { descriptor: String },
    /// Record content no index references.
    Orphan { descriptor: String },
    /// Extra data or blob could not be decoded.
    Unparseable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafReport {
    pub index: i64,
    pub merkle_leaf_hash: Digest,
    pub class: LeafClass,
    pub blob_present: bool,
    pub encrypted: bool,
}

/// Result of inspecting one tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeReport {
    pub tree: TreeId,
    pub leaves: Vec<LeafReport>,
    pub frozen: bool,
    pub tree_pointer: TreeId,
}

impl TreeReport {
    pub fn orphans(&self) -> impl Iterator<Item = &LeafReport> {
        self.leaves
            .iter()
            .filter(|l| matches!(l.class, LeafClass::Orphan { .. }))
    }

    pub fn missing_blobs(&self) -> impl Iterator<Item = &LeafReport> {
        self.leaves.iter().filter(|l| !l.blob_present)
    }

    pub fn is_clean(&self) -> bool {
        self.missing_blobs().next().is_none()
            && !self
                .leaves
                .iter()
                .any(|l| l.class == LeafClass::Unparseable)
    }
}

impl Tlog {
    /// Classify every leaf of `tree`. Read only.
    pub async fn fsck(&self, tree: TreeId) -> TlogResult<TreeReport> {
        let leaves = self.leaves_all(tree).await?;
        let keys: Vec<Digest> = leaves.iter().map(|l| l.merkle_leaf_hash).collect();
        let raw = self.blob_store().get(&keys)?;

        let indexes: Vec<Option<RecordIndex>> = leaves
            .iter()
            .map(|leaf| match ExtraData::decode(&leaf.extra_data) {
                Ok(extra) if extra.kind() == LeafKind::RecordIndex => self
                    .entry_get(tree, &extra.key)
                    .ok()
                    .flatten()
                    .and_then(|entry| entry.decode().ok()),
                _ => None,
            })
            .collect();
        let referenced: HashSet<Digest> = indexes
            .iter()
            .flatten()
            .flat_map(RecordIndex::digests)
            .collect();

        let mut reports = Vec::with_capacity(leaves.len());
        for (leaf, index) in leaves.iter().zip(&indexes) {
            let data = raw.get(&leaf.merkle_leaf_hash);
            let class = match ExtraData::decode(&leaf.extra_data) {
                Err(_) => LeafClass::Unparseable,
                Ok(extra) => match extra.kind() {
                    LeafKind::RecordContent if referenced.contains(&extra.key) => {
                        LeafClass::RecordContent {
                            descriptor: extra.descriptor,
                        }
                    }
                    LeafKind::RecordContent => LeafClass::Orphan {
                        descriptor: extra.descriptor,
                    },
                    LeafKind::RecordIndex => match index {
                        Some(index) => LeafClass::RecordIndex {
                            version: index.version,
                            iteration: index.iteration,
                            frozen: index.frozen,
                        },
                        None => LeafClass::Unparseable,
                    },
                    LeafKind::FreezeRecord => match self
                        .entry_get(tree, &extra.key)
                        .ok()
                        .flatten()
                        .and_then(|entry| entry.decode::<FreezeRecord>().ok())
                    {
                        Some(freeze) => LeafClass::FreezeRecord {
                            tree_pointer: freeze.tree_pointer,
                        },
                        None => LeafClass::Unparseable,
                    },
                    LeafKind::Anchor => LeafClass::Anchor,
                    LeafKind::Plugin => LeafClass::Plugin {
                        descriptor: extra.descriptor,
                    },
                },
            };

            if data.is_none() {
                warn!(tree_id = %tree, leaf = leaf.index, "leaf blob missing");
            }
            reports.push(LeafReport {
                index: leaf.index,
                merkle_leaf_hash: leaf.merkle_leaf_hash,
                class,
                blob_present: data.is_some(),
                encrypted: data.is_some_and(|d| EncryptionKey::is_encrypted(d)),
            });
        }

        let latest = indexes.iter().rev().flatten().next();
        let report = TreeReport {
            tree,
            frozen: latest.is_some_and(|i| i.frozen),
            tree_pointer: latest.map_or(TreeId::NONE, |i| i.tree_pointer),
            leaves: reports,
        };
        info!(
            tlog = %self.name(),
            tree_id = %tree,
            leaves = report.leaves.len(),
            orphans = report.orphans().count(),
            missing = report.missing_blobs().count(),
            "tree inspected"
        );
        Ok(report)
    }
}
