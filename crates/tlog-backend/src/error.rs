use tlog_engine::TlogError;
use tlog_plugin::PluginError;
use tlog_types::{ContentError, RecordStatus, Token};

/// Errors produced by the backend facade.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Submitted content failed verification. Never retried.
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("record not found: {0}")]
    RecordNotFound(Token),

    #[error("invalid status change: {from} -> {to}")]
    StatusChangeInvalid { from: RecordStatus, to: RecordStatus },

    #[error("backend is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("key file error: {0}")]
    KeyFile(String),

    #[error("tlog error: {0}")]
    Tlog(#[from] TlogError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Infrastructure failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Tlog(e) => e.is_transient(),
            BackendError::Plugin(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The content verification failure, if this is one.
    pub fn content_error(&self) -> Option<&ContentError> {
        match self {
            BackendError::Content(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
