use tlog_store::descriptor;
use tlog_types::Digest;

use crate::error::{TlogError, TlogResult};

/// What a leaf points at, derived from its descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafKind {
    /// Record metadata, a metadata stream, or a file.
    RecordContent,
    RecordIndex,
    FreezeRecord,
    Anchor,
    /// Data written by a plugin under its own descriptor.
    Plugin,
}

/// Leaf extra data: `"<descriptor>:<blob key hex>"`.
///
/// Lets a leaf be classified without fetching its blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraData {
    pub descriptor: String,
    pub key: Digest,
}

impl ExtraData {
    pub fn new(descriptor: impl Into<String>, key: Digest) -> Self {
        Self {
            descriptor: descriptor.into(),
            key,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}", self.descriptor, self.key.to_hex()).into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> TlogResult<Self> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| TlogError::Serialization(format!("leaf extra data: {e}")))?;
        let (descriptor, key) = s
            .rsplit_once(':')
            .ok_or_else(|| TlogError::Serialization(format!("leaf extra data: {s:?}")))?;
        let key = Digest::from_hex(key)
            .map_err(|e| TlogError::Serialization(format!("leaf extra data key: {e}")))?;
        Ok(Self::new(descriptor, key))
    }

    pub fn kind(&self) -> LeafKind {
        match self.descriptor.as_str() {
            descriptor::RECORD_INDEX => LeafKind::RecordIndex,
            descriptor::FREEZE_RECORD => LeafKind::FreezeRecord,
            descriptor::ANCHOR => LeafKind::Anchor,
            d if descriptor::RECORD_CONTENT.contains(&d) => LeafKind::RecordContent,
            _ => LeafKind::Plugin,
        }
    }
}

/// Whether a plugin may write blobs under `name`.
pub fn is_reserved_descriptor(name: &str) -> bool {
    name == descriptor::RECORD_INDEX
        || name == descriptor::FREEZE_RECORD
        || name == descriptor::ANCHOR
        || descriptor::RECORD_CONTENT.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let extra = ExtraData::new(descriptor::FILE, Digest::of(b"k"));
        assert_eq!(ExtraData::decode(&extra.encode()).unwrap(), extra);
    }

    #[test]
    fn plugin_descriptor_may_contain_colons() {
        let extra = ExtraData::new("comments:add:v1", Digest::of(b"k"));
        let back = ExtraData::decode(&extra.encode()).unwrap();
        assert_eq!(back.descriptor, "comments:add:v1");
        assert_eq!(back.kind(), LeafKind::Plugin);
    }

    #[test]
    fn kinds_follow_descriptor() {
        let k = Digest::of(b"k");
        assert_eq!(
            ExtraData::new(descriptor::RECORD_INDEX, k).kind(),
            LeafKind::RecordIndex
        );
        assert_eq!(
            ExtraData::new(descriptor::METADATA_STREAM, k).kind(),
            LeafKind::RecordContent
        );
        assert_eq!(ExtraData::new(descriptor::ANCHOR, k).kind(), LeafKind::Anchor);
        assert_eq!(
            ExtraData::new(descriptor::FREEZE_RECORD, k).kind(),
            LeafKind::FreezeRecord
        );
    }

    #[test]
    fn malformed_extra_data_is_rejected() {
        assert!(ExtraData::decode(b"no-separator").is_err());
        assert!(ExtraData::decode(b"File:nothex").is_err());
        assert!(ExtraData::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn reserved_descriptors() {
        assert!(is_reserved_descriptor(descriptor::FILE));
        assert!(is_reserved_descriptor(descriptor::ANCHOR));
        assert!(!is_reserved_descriptor("comments:add"));
    }
}
