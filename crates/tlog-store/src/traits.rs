use std::collections::HashMap;

use tlog_types::Digest;

use crate::entry::StagedBlob;
use crate::error::StoreResult;

/// Read access to a blob store.
///
/// Implementations must satisfy:
/// - Missing keys are simply absent from the result, not an error.
/// - Concurrent reads are always safe (blobs are immutable).
/// - I/O failures are propagated, never silently dropped.
pub trait BlobReader: Send + Sync {
    /// Fetch the blobs stored under `keys`.
    fn get(&self, keys: &[Digest]) -> StoreResult<HashMap<Digest, Vec<u8>>>;
}

/// Write access to a blob store.
pub trait BlobWriter: Send + Sync {
    /// Persist blobs and return their content-address keys, in input order.
    ///
    /// The key of a blob is derived from its leaf value, never from the
    /// stored bytes, so sealed and plain encodings of the same content share
    /// a key. Writing a key that already exists is a no-op.
    fn put(&self, blobs: &[StagedBlob]) -> StoreResult<Vec<Digest>>;

    /// Remove blobs. Missing keys are ignored.
    ///
    /// Only repair tooling deletes; the backend itself never does.
    fn del(&self, keys: &[Digest]) -> StoreResult<()>;
}

/// Enumeration of every stored blob, for reconstruction and repair.
pub trait BlobEnumerator: Send + Sync {
    /// Call `visit` once per stored blob. An error from `visit` stops the
    /// walk and is returned.
    fn enumerate(
        &self,
        visit: &mut dyn FnMut(&Digest, &[u8]) -> StoreResult<()>,
    ) -> StoreResult<()>;
}

/// A full read/write/enumerate store.
pub trait BlobStore: BlobReader + BlobWriter + BlobEnumerator {
    /// Release resources. Later calls fail with `StoreError::Closed`.
    fn close(&self) -> StoreResult<()>;
}
