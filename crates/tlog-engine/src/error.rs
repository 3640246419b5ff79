use tlog_client::{LogError, TimestampError};
use tlog_crypto::EncryptionError;
use tlog_store::StoreError;
use tlog_types::{Digest, TreeId};

/// Errors produced by trust log operations.
#[derive(Debug, thiserror::Error)]
pub enum TlogError {
    #[error("tree not found: {0}")]
    TreeNotFound(TreeId),

    /// The tree exists but holds no usable record index.
    #[error("no record in tree {0}")]
    RecordNotFound(TreeId),

    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    #[error("tree {0} is frozen")]
    TreeFrozen(TreeId),

    #[error("blob is encrypted but no encryption key is configured")]
    MissingEncryptionKey,

    #[error("descriptor `{0}` is reserved for record content")]
    ReservedDescriptor(String),

    /// The log refused some leaves of a batch. Content leaves committed
    /// before the refusal are orphans.
    #[error("log rejected {rejected} leaves appended to tree {tree}")]
    AppendRejected { tree: TreeId, rejected: usize },

    /// Stored state contradicts itself.
    #[error("corrupt tree {tree}: {reason}")]
    Corrupt { tree: TreeId, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("log error: {0}")]
    Log(LogError),

    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<LogError> for TlogError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::TreeNotFound(tree) => TlogError::TreeNotFound(tree),
            other => TlogError::Log(other),
        }
    }
}

impl From<serde_json::Error> for TlogError {
    fn from(e: serde_json::Error) -> Self {
        TlogError::Serialization(e.to_string())
    }
}

impl TlogError {
    /// Infrastructure failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TlogError::Log(e) => e.is_transient(),
            TlogError::Timestamp(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TlogError::TreeNotFound(_) | TlogError::RecordNotFound(_) | TlogError::BlobNotFound(_)
        )
    }
}

/// Result alias for trust log operations.
pub type TlogResult<T> = Result<T, TlogError>;
