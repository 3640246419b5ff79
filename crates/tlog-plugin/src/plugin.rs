use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// Error code every plugin reserves for a payload it cannot decode.
pub const ERROR_CODE_INVALID: i32 = 0;

/// A `key = value` plugin setting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSetting {
    pub key: String,
    pub value: String,
}

impl PluginSetting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Identity of a registered plugin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    pub version: String,
    pub settings: Vec<PluginSetting>,
}

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A command handler: JSON payload in, JSON reply out.
pub type Handler = Arc<dyn Fn(String) -> BoxFuture<PluginResult<String>> + Send + Sync>;

/// The commands a plugin serves, keyed by name.
#[derive(Clone)]
pub struct CommandTable {
    plugin_id: String,
    handlers: BTreeMap<String, Handler>,
}

impl CommandTable {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler over typed request and reply. A payload that does
    /// not decode as `Req` is a user error with [`ERROR_CODE_INVALID`].
    pub fn typed<Req, Rep, F, Fut>(mut self, command: &str, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Rep: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Rep>> + Send + 'static,
    {
        let plugin_id = self.plugin_id.clone();
        let name = command.to_string();
        let handler = Arc::new(handler);
        let erased: Handler = Arc::new(move |payload: String| -> BoxFuture<PluginResult<String>> {
            let handler = Arc::clone(&handler);
            let plugin_id = plugin_id.clone();
            let name = name.clone();
            Box::pin(async move {
                let request: Req = serde_json::from_str(&payload).map_err(|e| {
                    PluginError::user(&plugin_id, ERROR_CODE_INVALID, format!("{name}: {e}"))
                })?;
                let reply = handler(request).await?;
                Ok(serde_json::to_string(&reply)?)
            })
        });
        self.handlers.insert(command.to_string(), erased);
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn get(&self, command: &str) -> Option<Handler> {
        self.handlers.get(command).cloned()
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandTable")
            .field("plugin_id", &self.plugin_id)
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A backend plugin.
///
/// Implementations are `Send + Sync`; the command table holds clones of the
/// plugin so handlers can run concurrently.
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    fn commands(self: Arc<Self>) -> CommandTable;
}
