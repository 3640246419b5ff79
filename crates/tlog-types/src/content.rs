//! Structural validation of caller-supplied record content.
//!
//! Content errors are reported synchronously to the caller and are never
//! retried. Each carries a stable numeric code.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::record::{File, MetadataStream};

/// Highest metadata stream id accepted.
pub const METADATA_STREAMS_MAX: u64 = 16;

/// MIME types a record file may declare.
pub const ALLOWED_MIME_TYPES: &[&str] = &["text/plain", "text/plain; charset=utf-8", "image/png"];

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Stable numeric codes for content verification failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentErrorCode {
    InvalidMetadataId = 1,
    DuplicateMetadataId = 2,
    InvalidFilename = 3,
    DuplicateFilename = 4,
    Empty = 5,
    InvalidFileDigest = 6,
    InvalidBase64 = 7,
    InvalidMimeType = 8,
    FileNotFound = 9,
    NoChanges = 10,
    RecordLocked = 11,
}

impl ContentErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ContentErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentErrorCode::InvalidMetadataId => "invalid metadata stream id",
            ContentErrorCode::DuplicateMetadataId => "duplicate metadata stream id",
            ContentErrorCode::InvalidFilename => "invalid filename",
            ContentErrorCode::DuplicateFilename => "duplicate filename",
            ContentErrorCode::Empty => "no files",
            ContentErrorCode::InvalidFileDigest => "invalid file digest",
            ContentErrorCode::InvalidBase64 => "invalid base64 payload",
            ContentErrorCode::InvalidMimeType => "invalid mime type",
            ContentErrorCode::FileNotFound => "file not found",
            ContentErrorCode::NoChanges => "no changes",
            ContentErrorCode::RecordLocked => "record locked",
        };
        write!(f, "{s}")
    }
}

/// A content verification failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("content verification failed: {code}{}", context_suffix(.context))]
pub struct ContentError {
    pub code: ContentErrorCode,
    pub context: Vec<String>,
}

fn context_suffix(context: &[String]) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" ({})", context.join(", "))
    }
}

impl ContentError {
    pub fn new(code: ContentErrorCode) -> Self {
        Self {
            code,
            context: Vec::new(),
        }
    }

    pub fn with_context(code: ContentErrorCode, context: impl Into<String>) -> Self {
        Self {
            code,
            context: vec![context.into()],
        }
    }
}

/// Verify metadata streams: ids in range and unique.
pub fn verify_metadata(streams: &[MetadataStream]) -> Result<(), ContentError> {
    let mut seen = HashSet::new();
    for md in streams {
        if md.id > METADATA_STREAMS_MAX {
            return Err(ContentError::with_context(
                ContentErrorCode::InvalidMetadataId,
                md.id.to_string(),
            ));
        }
        if !seen.insert(md.id) {
            return Err(ContentError::with_context(
                ContentErrorCode::DuplicateMetadataId,
                md.id.to_string(),
            ));
        }
    }
    Ok(())
}

/// Verify files: valid unique names, allowed mime type, decodable payload
/// whose SHA-256 matches the declared digest.
pub fn verify_files(files: &[File]) -> Result<(), ContentError> {
    let mut seen = HashSet::new();
    for f in files {
        if !is_valid_filename(&f.name) {
            return Err(ContentError::with_context(
                ContentErrorCode::InvalidFilename,
                f.name.clone(),
            ));
        }
        if !seen.insert(f.name.as_str()) {
            return Err(ContentError::with_context(
                ContentErrorCode::DuplicateFilename,
                f.name.clone(),
            ));
        }

        let data = STANDARD.decode(&f.payload).map_err(|_| {
            ContentError::with_context(ContentErrorCode::InvalidBase64, f.name.clone())
        })?;

        let declared = Digest::from_hex(&f.digest).map_err(|_| {
            ContentError::with_context(ContentErrorCode::InvalidFileDigest, f.name.clone())
        })?;
        if Digest::of(&data) != declared {
            return Err(ContentError::with_context(
                ContentErrorCode::InvalidFileDigest,
                f.name.clone(),
            ));
        }

        if !mime_matches(&f.mime, &data) {
            return Err(ContentError::with_context(
                ContentErrorCode::InvalidMimeType,
                format!("{}: {}", f.name, f.mime),
            ));
        }
    }
    Ok(())
}

/// Verify a complete content submission. `require_files` is set for new
/// records, which must carry at least one file.
pub fn verify_content(
    metadata: &[MetadataStream],
    files: &[File],
    require_files: bool,
) -> Result<(), ContentError> {
    if require_files && files.is_empty() {
        return Err(ContentError::new(ContentErrorCode::Empty));
    }
    verify_metadata(metadata)?;
    verify_files(files)
}

fn is_valid_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

fn mime_matches(mime: &str, data: &[u8]) -> bool {
    if !ALLOWED_MIME_TYPES.contains(&mime) {
        return false;
    }
    if mime == "image/png" {
        data.starts_with(PNG_MAGIC)
    } else {
        std::str::from_utf8(data).is_ok()
    }
}

/// Metadata stream edits applied on update or status change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOps {
    /// Payload is appended to the existing stream with the same id.
    pub append: Vec<MetadataStream>,
    /// Payload replaces the existing stream with the same id.
    pub overwrite: Vec<MetadataStream>,
}

impl MetadataOps {
    pub fn is_empty(&self) -> bool {
        self.append.is_empty() && self.overwrite.is_empty()
    }

    pub fn verify(&self) -> Result<(), ContentError> {
        verify_metadata(&self.append)?;
        verify_metadata(&self.overwrite)
    }

    /// Apply the edits to `existing`. Overwrites happen before appends; the
    /// result is ordered by stream id.
    pub fn apply(&self, existing: &[MetadataStream]) -> Vec<MetadataStream> {
        let mut streams: BTreeMap<u64, String> = existing
            .iter()
            .map(|md| (md.id, md.payload.clone()))
            .collect();
        for md in &self.overwrite {
            streams.insert(md.id, md.payload.clone());
        }
        for md in &self.append {
            streams.entry(md.id).or_default().push_str(&md.payload);
        }
        streams
            .into_iter()
            .map(|(id, payload)| MetadataStream { id, payload })
            .collect()
    }
}

/// Apply file additions and deletions to an existing file set.
///
/// Additions replace files with the same name. Deleting a name that is not
/// present fails with [`ContentErrorCode::FileNotFound`]. The result is
/// ordered by name.
pub fn apply_file_changes(
    existing: &[File],
    add: &[File],
    del: &[String],
) -> Result<Vec<File>, ContentError> {
    let mut files: BTreeMap<String, File> = existing
        .iter()
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    for name in del {
        if files.remove(name).is_none() {
            return Err(ContentError::with_context(
                ContentErrorCode::FileNotFound,
                name.clone(),
            ));
        }
    }
    for f in add {
        files.insert(f.name.clone(), f.clone());
    }
    Ok(files.into_values().collect())
}
