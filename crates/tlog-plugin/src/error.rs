use tlog_types::TreeId;

/// A recoverable, user-facing plugin failure.
///
/// `error_code` is plugin specific; the caller maps it to its own error
/// vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("plugin {plugin_id} error {error_code}{}", context_suffix(.error_context))]
pub struct PluginUserError {
    pub plugin_id: String,
    pub error_code: i32,
    pub error_context: Vec<String>,
}

fn context_suffix(context: &[String]) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(": {}", context.join(", "))
    }
}

/// Errors produced by plugin dispatch and plugin commands.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    User(#[from] PluginUserError),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin {plugin_id} has no command `{command}`")]
    UnknownCommand { plugin_id: String, command: String },

    /// The envelope challenge is not 32 hex-encoded bytes.
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("invalid plugin setting {key}: {reason}")]
    Setting { key: String, reason: String },

    /// The record's tree stopped accepting appends, for example because the
    /// record graduated or reached a terminal status.
    #[error("record tree {0} is frozen")]
    RecordFrozen(TreeId),

    /// Infrastructure failure below the plugin. The caller may retry when
    /// `transient` is set.
    #[error("backend error: {message}")]
    Backend { message: String, transient: bool },

    #[error("internal plugin error: {0}")]
    Internal(String),
}

impl PluginError {
    pub fn user(plugin_id: &str, error_code: i32, context: impl Into<String>) -> Self {
        let context = context.into();
        PluginError::User(PluginUserError {
            plugin_id: plugin_id.to_string(),
            error_code,
            error_context: if context.is_empty() {
                Vec::new()
            } else {
                vec![context]
            },
        })
    }

    pub fn backend(message: impl std::fmt::Display, transient: bool) -> Self {
        PluginError::Backend {
            message: message.to_string(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PluginError::Backend { transient: true, .. })
    }

    pub fn user_error(&self) -> Option<&PluginUserError> {
        match self {
            PluginError::User(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        PluginError::Internal(e.to_string())
    }
}

impl From<tlog_store::StoreError> for PluginError {
    fn from(e: tlog_store::StoreError) -> Self {
        PluginError::Internal(e.to_string())
    }
}

/// Result alias for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
