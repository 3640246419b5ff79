use tlog_types::TreeId;

/// Errors produced by log client operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("tree not found: {0}")]
    TreeNotFound(TreeId),

    /// The service could not be reached; nothing was committed.
    #[error("log service unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete in time. For appends the outcome is
    /// unknown and must be reconciled before any retry.
    #[error("log service call `{op}` timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },

    #[error("invalid leaf range: start={start}, count={count}")]
    InvalidRange { start: i64, count: i64 },

    #[error("signed log root failed verification: {0}")]
    BadSignature(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LogError {
    /// Errors where retrying an idempotent call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LogError::Unavailable(_) | LogError::Timeout { .. })
    }
}

/// Result alias for log client operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors produced by the external timestamp service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp service unavailable: {0}")]
    Unavailable(String),

    #[error("timestamp service call `{op}` timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },

    #[error("unknown timestamp batch: {0}")]
    BatchNotFound(String),

    #[error("timestamp submission rejected: {0}")]
    Rejected(String),
}

impl TimestampError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TimestampError::Unavailable(_) | TimestampError::Timeout { .. }
        )
    }
}

/// Result alias for timestamp operations.
pub type TimestampResult<T> = Result<T, TimestampError>;
