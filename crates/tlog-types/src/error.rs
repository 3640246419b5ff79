use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid record status: {0}")]
    InvalidStatus(u32),

    #[error("invalid record state: {0}")]
    InvalidState(u32),

    #[error("serialization error: {0}")]
    Serialization(String),
}
