//! Content-addressed blob storage for the trust log backend.
//!
//! Every leaf appended to a log tree points at exactly one blob. The blob's
//! key is the leaf's merkle leaf hash, so identical content always lands
//! under the same key and a write of existing content is a no-op.
//!
//! # Capabilities
//!
//! Stores expose narrow traits rather than one wide interface:
//!
//! - [`BlobReader`] -- `get`
//! - [`BlobWriter`] -- `put` / `del`
//! - [`BlobEnumerator`] -- `enumerate` for repair and inspection tooling
//! - [`BlobStore`] -- all three plus `close`
//!
//! A read-only store such as [`FileSystemBlobReader`] implements only
//! [`BlobReader`], so it cannot be handed to code that writes.
//!
//! # Backends
//!
//! - [`InMemoryBlobStore`] -- `HashMap`-based store for tests and embedding
//! - [`FileSystemBlobStore`] -- one file per key under a root directory
//!
//! # Blob Encoding
//!
//! [`BlobEntry`] is the JSON envelope stored in each blob: a base64
//! [`DataDescriptor`] hint, the base64 payload, and the payload digest.
//! The store itself never interprets blob contents.

pub mod entry;
pub mod error;
pub mod filesystem;
pub mod memory;
pub mod traits;

pub use entry::{descriptor, BlobEntry, DataDescriptor, StagedBlob};
pub use error::{StoreError, StoreResult};
pub use filesystem::{FileSystemBlobReader, FileSystemBlobStore};
pub use memory::InMemoryBlobStore;
pub use traits::{BlobEnumerator, BlobReader, BlobStore, BlobWriter};
