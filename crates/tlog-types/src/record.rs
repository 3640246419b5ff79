use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::TypeError;
use crate::token::Token;

/// Which trust log a record currently lives in.
///
/// The numeric value appears in plugin signature strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Unvetted,
    Vetted,
}

impl RecordState {
    pub fn as_u32(self) -> u32 {
        match self {
            RecordState::Unvetted => 1,
            RecordState::Vetted => 2,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, TypeError> {
        match value {
            1 => Ok(RecordState::Unvetted),
            2 => Ok(RecordState::Vetted),
            other => Err(TypeError::InvalidState(other)),
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Unvetted => write!(f, "unvetted"),
            RecordState::Vetted => write!(f, "vetted"),
        }
    }
}

/// Review status of a record.
///
/// ```text
/// NotReviewed ──┬──► Public ──┬──► Censored
/// Unreviewed-   │             └──► Archived
///   Changes   ──┴──► Censored
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Submitted, waiting for review.
    NotReviewed,
    /// Updated by its author while still waiting for review.
    UnreviewedChanges,
    /// Rejected by a reviewer. Terminal.
    Censored,
    /// Approved and moved to the vetted log.
    Public,
    /// Retired after being public. Terminal.
    Archived,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::NotReviewed,
        RecordStatus::UnreviewedChanges,
        RecordStatus::Censored,
        RecordStatus::Public,
        RecordStatus::Archived,
    ];

    /// Whether a record in this status lives in the unvetted log.
    pub fn is_unvetted(self) -> bool {
        matches!(
            self,
            RecordStatus::NotReviewed | RecordStatus::UnreviewedChanges
        )
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Censored | RecordStatus::Archived)
    }

    /// Whether `self -> to` is an allowed status change.
    pub fn can_transition(self, to: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, to),
            (NotReviewed | UnreviewedChanges, Censored | Public) | (Public, Censored | Archived)
        )
    }

    pub fn as_u32(self) -> u32 {
        match self {
            RecordStatus::NotReviewed => 1,
            RecordStatus::UnreviewedChanges => 2,
            RecordStatus::Censored => 3,
            RecordStatus::Public => 4,
            RecordStatus::Archived => 5,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self, TypeError> {
        RecordStatus::ALL
            .into_iter()
            .find(|s| s.as_u32() == value)
            .ok_or(TypeError::InvalidStatus(value))
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordStatus::NotReviewed => "not reviewed",
            RecordStatus::UnreviewedChanges => "unreviewed changes",
            RecordStatus::Censored => "censored",
            RecordStatus::Public => "public",
            RecordStatus::Archived => "archived",
        };
        write!(f, "{name}")
    }
}

/// A numbered, free-form metadata stream attached to a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStream {
    pub id: u64,
    pub payload: String,
}

impl MetadataStream {
    pub fn new(id: u64, payload: impl Into<String>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// A file belonging to a record. The payload is base64 encoded and the
/// digest is the hex SHA-256 of the decoded payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub mime: String,
    pub digest: String,
    pub payload: String,
}

impl File {
    /// Build a file from raw bytes, computing digest and encoding.
    pub fn from_bytes(name: impl Into<String>, mime: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            digest: Digest::of(data).to_hex(),
            payload: STANDARD.encode(data),
        }
    }

    /// Decode the base64 payload.
    pub fn decode_payload(&self) -> Result<Vec<u8>, TypeError> {
        STANDARD
            .decode(&self.payload)
            .map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

/// Backend-owned metadata describing one record state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub token: Token,
    pub version: u32,
    pub iteration: u32,
    pub status: RecordStatus,
    /// Classical merkle root over the file digests.
    pub merkle: Digest,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Client-verifiable receipt returned when a record is submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CensorshipRecord {
    pub token: Token,
    pub merkle: Digest,
    /// Hex ed25519 signature over `merkle_hex || token_hex`.
    pub signature: String,
}

impl CensorshipRecord {
    /// The exact message the backend signs.
    pub fn message(merkle: &Digest, token: &Token) -> String {
        format!("{}{}", merkle.to_hex(), token.to_hex())
    }
}

/// A record as seen by callers. Derived from a record index, never persisted
/// as such.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub state: RecordState,
    pub record_metadata: RecordMetadata,
    pub metadata: Vec<MetadataStream>,
    pub files: Vec<File>,
    pub censorship_record: CensorshipRecord,
}

impl Record {
    pub fn token(&self) -> Token {
        self.record_metadata.token
    }

    pub fn status(&self) -> RecordStatus {
        self.record_metadata.status
    }

    pub fn version(&self) -> u32 {
        self.record_metadata.version
    }

    pub fn iteration(&self) -> u32 {
        self.record_metadata.iteration
    }
}
