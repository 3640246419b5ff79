use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tlog_crypto::LogHasher;
use tlog_types::Digest;

use crate::error::{StoreError, StoreResult};

/// Built-in descriptor names. Plugins use their own namespaced descriptors.
pub mod descriptor {
    pub const RECORD_METADATA: &str = "RecordMetadata";
    pub const METADATA_STREAM: &str = "MetadataStream";
    pub const FILE: &str = "File";
    pub const RECORD_INDEX: &str = "RecordIndex";
    pub const ANCHOR: &str = "Anchor";
    pub const FREEZE_RECORD: &str = "FreezeRecord";

    /// Descriptors whose blobs make up a record state.
    pub const RECORD_CONTENT: &[&str] = &[RECORD_METADATA, METADATA_STREAM, FILE];
}

/// Describes what a blob's payload is. Stored base64 encoded as the entry's
/// data hint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDescriptor {
    #[serde(rename = "type")]
    pub data_type: String,
    pub descriptor: String,
    #[serde(default, rename = "extraData", skip_serializing_if = "String::is_empty")]
    pub extra_data: String,
}

impl DataDescriptor {
    pub fn json(descriptor: impl Into<String>) -> Self {
        Self {
            data_type: "struct".into(),
            descriptor: descriptor.into(),
            extra_data: String::new(),
        }
    }
}

/// The envelope written into every blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobEntry {
    /// SHA-256 of the decoded payload. Also the log leaf value.
    pub digest: Digest,
    /// base64(JSON(DataDescriptor))
    pub data_hint: String,
    /// base64(payload)
    pub data: String,
}

impl BlobEntry {
    /// Build an entry around raw payload bytes.
    pub fn new(descriptor: DataDescriptor, payload: &[u8]) -> StoreResult<Self> {
        let hint = serde_json::to_vec(&descriptor)?;
        Ok(Self {
            digest: Digest::of(payload),
            data_hint: STANDARD.encode(hint),
            data: STANDARD.encode(payload),
        })
    }

    /// Build an entry around a JSON-encoded value.
    pub fn from_json<T: Serialize>(descriptor: &str, value: &T) -> StoreResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Self::new(DataDescriptor::json(descriptor), &payload)
    }

    pub fn descriptor(&self) -> StoreResult<DataDescriptor> {
        let hint = STANDARD
            .decode(&self.data_hint)
            .map_err(|e| StoreError::CorruptEntry(format!("data hint: {e}")))?;
        Ok(serde_json::from_slice(&hint)?)
    }

    /// Decode the payload and check it against the recorded digest.
    pub fn payload(&self) -> StoreResult<Vec<u8>> {
        let data = STANDARD
            .decode(&self.data)
            .map_err(|e| StoreError::CorruptEntry(format!("data: {e}")))?;
        let computed = Digest::of(&data);
        if computed != self.digest {
            return Err(StoreError::DigestMismatch {
                expected: self.digest,
                computed,
            });
        }
        Ok(data)
    }

    /// Decode a JSON payload into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_slice(&self.payload()?)?)
    }

    /// Serialize the entry into blob bytes.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse blob bytes into an entry.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptEntry(format!("blob entry: {e}")))
    }

    /// The blob store key of this entry's content.
    pub fn key(&self) -> Digest {
        LogHasher::leaf_hash(self.digest.as_bytes())
    }
}

/// A blob ready to be written: its leaf value plus the bytes to persist,
/// which may be sealed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedBlob {
    pub value: Digest,
    pub data: Vec<u8>,
}

impl StagedBlob {
    pub fn new(value: Digest, data: Vec<u8>) -> Self {
        Self { value, data }
    }

    /// Content-address key: the merkle leaf hash of the leaf value.
    pub fn key(&self) -> Digest {
        LogHasher::leaf_hash(self.value.as_bytes())
    }
}
