//! Foundation types for the trust log backend.
//!
//! This crate provides the identity, addressing, and record model types used
//! throughout the backend. Every other `tlog-*` crate depends on `tlog-types`.
//!
//! # Key Types
//!
//! - [`Digest`] -- SHA-256 digest, hex encoded on the wire
//! - [`TreeId`] -- Identifier of one append-only log tree
//! - [`Token`] -- Stable record identity, derived from the first tree id
//! - [`RecordStatus`] / [`RecordState`] -- Lifecycle state machine
//! - [`Record`] -- Logical record assembled from a record index
//! - [`ContentError`] -- Structural validation failure of submitted content

pub mod content;
pub mod digest;
pub mod error;
pub mod record;
pub mod token;

pub use content::{
    apply_file_changes, verify_content, verify_files, verify_metadata, ContentError,
    ContentErrorCode, MetadataOps, ALLOWED_MIME_TYPES, METADATA_STREAMS_MAX,
};
pub use digest::Digest;
pub use error::TypeError;
pub use record::{
    CensorshipRecord, File, MetadataStream, Record, RecordMetadata, RecordState, RecordStatus,
};
pub use token::{Token, TreeId};
