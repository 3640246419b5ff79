use async_trait::async_trait;
use tlog_store::BlobEntry;
use tlog_types::{Digest, RecordState, RecordStatus, Token, TreeId};

use crate::error::PluginResult;

/// A record as seen by a plugin: where its data lives and what state it
/// is in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordRef {
    pub token: Token,
    pub state: RecordState,
    pub tree: TreeId,
    pub status: RecordStatus,
    pub version: u32,
}

/// The backend operations available to plugins.
///
/// Plugin data lives in the record's own tree, in the tlog of the record's
/// state.
#[async_trait]
pub trait PluginBackend: Send + Sync {
    /// Resolve `token` in `state`. `None` when no such record exists there.
    async fn record(&self, state: RecordState, token: &Token) -> PluginResult<Option<RecordRef>>;

    /// Persist plugin blobs as leaves of the record's tree.
    async fn blobs_save(&self, record: &RecordRef, entries: Vec<BlobEntry>)
        -> PluginResult<Vec<Digest>>;

    /// Every blob of the record's tree written under `descriptor`, in
    /// append order.
    async fn blobs_by_descriptor(&self, record: &RecordRef, descriptor: &str)
        -> PluginResult<Vec<BlobEntry>>;
}
