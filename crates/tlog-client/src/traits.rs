use async_trait::async_trait;
use tlog_crypto::VerifyingKey;
use tlog_types::TreeId;

use crate::error::LogResult;
use crate::leaf::{AppendResult, LeafInput, LogLeaf, SignedLogRoot};

/// Client boundary of the verifiable append-only log service.
///
/// Contract per tree:
/// - Leaf indices start at 0 and increase by exactly 1 per committed leaf.
/// - A batch passed to [`LogClient::leaves_append`] is applied atomically
///   with respect to that tree: no other append interleaves its indices.
/// - Append is not idempotent. Submitting the same leaves twice commits
///   them twice.
/// - Reads return leaves ordered by index and are safe to repeat.
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Create a new, empty tree.
    async fn tree_new(&self) -> LogResult<TreeId>;

    /// Ids of every tree known to the service.
    async fn trees_all(&self) -> LogResult<Vec<TreeId>>;

    /// Append a batch of leaves in order.
    async fn leaves_append(&self, tree: TreeId, leaves: Vec<LeafInput>)
        -> LogResult<AppendResult>;

    /// Up to `count` leaves starting at index `start`.
    async fn leaves_by_range(&self, tree: TreeId, start: i64, count: i64)
        -> LogResult<Vec<LogLeaf>>;

    /// The latest signed root of `tree`.
    async fn signed_log_root(&self, tree: TreeId) -> LogResult<SignedLogRoot>;

    /// Key the service signs log roots with.
    fn public_key(&self) -> VerifyingKey;

    /// Every leaf of `tree`, in index order.
    async fn leaves_all(&self, tree: TreeId) -> LogResult<Vec<LogLeaf>> {
        let root = self.signed_log_root(tree).await?.decode()?;
        if root.tree_size == 0 {
            return Ok(Vec::new());
        }
        self.leaves_by_range(tree, 0, root.tree_size as i64).await
    }
}
