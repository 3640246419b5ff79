//! Plugin dispatch for the trust log backend.
//!
//! A plugin registers a [`PluginInfo`] and a [`CommandTable`] of handlers.
//! Handlers take and return JSON strings; [`CommandTable::typed`] does the
//! decoding so a plugin is written against typed requests and replies.
//!
//! Handlers reach records only through [`PluginBackend`], which resolves a
//! token to its tree and persists plugin blobs as leaves of that tree.
//!
//! Failures come in two kinds. A [`PluginUserError`] is a refusal the caller
//! should show to its user; anything else is an infrastructure failure,
//! retryable when [`PluginError::is_transient`] says so.
//!
//! [`comments`] is the reference plugin.

pub mod backend;
pub mod comments;
pub mod envelope;
pub mod error;
pub mod plugin;
pub mod registry;

pub use backend::{PluginBackend, RecordRef};
pub use comments::{CommentsPlugin, CommentsSettings};
pub use envelope::{
    challenge_response, decode_challenge, new_challenge, verify_challenge, PluginCommand,
    PluginCommandReply, CHALLENGE_LEN,
};
pub use error::{PluginError, PluginResult, PluginUserError};
pub use plugin::{CommandTable, Handler, Plugin, PluginInfo, PluginSetting, ERROR_CODE_INVALID};
pub use registry::PluginRegistry;
