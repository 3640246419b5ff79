use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tlog_types::Digest;

use crate::entry::StagedBlob;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobEnumerator, BlobReader, BlobStore, BlobWriter};

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock` and
/// cloned on read/write.
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<Digest, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of all keys in the store.
    pub fn all_keys(&self) -> Vec<Digest> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut keys: Vec<Digest> = map.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Overwrite a blob in place, bypassing content addressing. Test hook for
    /// simulating on-disk corruption.
    pub fn corrupt(&self, key: &Digest, data: Vec<u8>) {
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(*key, data);
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobReader for InMemoryBlobStore {
    fn get(&self, keys: &[Digest]) -> StoreResult<HashMap<Digest, Vec<u8>>> {
        self.check_open()?;
        let map = self.blobs.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .filter_map(|k| map.get(k).map(|v| (*k, v.clone())))
            .collect())
    }
}

impl BlobWriter for InMemoryBlobStore {
    fn put(&self, blobs: &[StagedBlob]) -> StoreResult<Vec<Digest>> {
        self.check_open()?;
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(blobs
            .iter()
            .map(|blob| {
                let key = blob.key();
                // Existing content under a key is never replaced.
                map.entry(key).or_insert_with(|| blob.data.clone());
                key
            })
            .collect())
    }

    fn del(&self, keys: &[Digest]) -> StoreResult<()> {
        self.check_open()?;
        let mut map = self.blobs.write().expect("lock poisoned");
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }
}

impl BlobEnumerator for InMemoryBlobStore {
    fn enumerate(
        &self,
        visit: &mut dyn FnMut(&Digest, &[u8]) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.check_open()?;
        // Snapshot so `visit` may call back into the store.
        let snapshot: Vec<(Digest, Vec<u8>)> = {
            let map = self.blobs.read().expect("lock poisoned");
            map.iter().map(|(k, v)| (*k, v.clone())).collect()
        };
        for (k, v) in &snapshot {
            visit(k, v)?;
        }
        Ok(())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}
