use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;
use tlog_types::Digest;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::entry::StagedBlob;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobEnumerator, BlobReader, BlobStore, BlobWriter};

/// Filesystem blob store: one file per blob, named by the hex key, directly
/// under the root directory.
///
/// Each write goes to a temporary file in the root and is then linked into
/// place without clobbering, so a key is either absent or fully written.
pub struct FileSystemBlobStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl FileSystemBlobStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened filesystem blob store");
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn write_one(&self, blob: &StagedBlob) -> StoreResult<Digest> {
        let key = blob.key();
        let path = blob_path(&self.root, &key);
        if path.exists() {
            return Ok(key);
        }

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&blob.data)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            // A concurrent writer stored the same key first.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StoreError::Io(e.error)),
        }
        Ok(key)
    }
}

impl BlobReader for FileSystemBlobStore {
    fn get(&self, keys: &[Digest]) -> StoreResult<HashMap<Digest, Vec<u8>>> {
        self.check_open()?;
        read_keys(&self.root, keys)
    }
}

impl BlobWriter for FileSystemBlobStore {
    fn put(&self, blobs: &[StagedBlob]) -> StoreResult<Vec<Digest>> {
        self.check_open()?;
        blobs.iter().map(|b| self.write_one(b)).collect()
    }

    fn del(&self, keys: &[Digest]) -> StoreResult<()> {
        self.check_open()?;
        for key in keys {
            match fs::remove_file(blob_path(&self.root, key)) {
                Ok(()) => debug!(key = %key, "deleted blob"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl BlobEnumerator for FileSystemBlobStore {
    fn enumerate(
        &self,
        visit: &mut dyn FnMut(&Digest, &[u8]) -> StoreResult<()>,
    ) -> StoreResult<()> {
        self.check_open()?;
        enumerate_dir(&self.root, visit)
    }
}

impl BlobStore for FileSystemBlobStore {
    fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        debug!(root = %self.root.display(), "closed filesystem blob store");
        Ok(())
    }
}

impl std::fmt::Debug for FileSystemBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSystemBlobStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Read-only view of a filesystem blob store, for inspection tooling.
///
/// Implements only [`BlobReader`] and [`BlobEnumerator`].
#[derive(Debug)]
pub struct FileSystemBlobReader {
    root: PathBuf,
}

impl FileSystemBlobReader {
    /// Open an existing store directory. Fails if it does not exist.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob store not found: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }
}

impl BlobReader for FileSystemBlobReader {
    fn get(&self, keys: &[Digest]) -> StoreResult<HashMap<Digest, Vec<u8>>> {
        read_keys(&self.root, keys)
    }
}

impl BlobEnumerator for FileSystemBlobReader {
    fn enumerate(
        &self,
        visit: &mut dyn FnMut(&Digest, &[u8]) -> StoreResult<()>,
    ) -> StoreResult<()> {
        enumerate_dir(&self.root, visit)
    }
}

fn blob_path(root: &Path, key: &Digest) -> PathBuf {
    root.join(key.to_hex())
}

fn read_keys(root: &Path, keys: &[Digest]) -> StoreResult<HashMap<Digest, Vec<u8>>> {
    let mut out = HashMap::with_capacity(keys.len());
    for key in keys {
        match fs::read(blob_path(root, key)) {
            Ok(data) => {
                out.insert(*key, data);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(out)
}

fn enumerate_dir(
    root: &Path,
    visit: &mut dyn FnMut(&Digest, &[u8]) -> StoreResult<()>,
) -> StoreResult<()> {
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            StoreError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Ok(key) = Digest::from_hex(&name) else {
            // Leftover temporary files from interrupted writes.
            warn!(file = %name, "skipping non-blob file in store");
            continue;
        };
        let data = fs::read(entry.path())?;
        visit(&key, &data)?;
    }
    Ok(())
}
