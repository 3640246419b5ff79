use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::{CommandTable, Plugin, PluginInfo};

struct Registered {
    info: PluginInfo,
    table: CommandTable,
}

/// Table of registered plugins.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Registered>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Registering an id that is already present keeps
    /// the existing plugin and returns `false`.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> bool {
        let info = plugin.info();
        let mut plugins = self.plugins.write().expect("lock poisoned");
        if plugins.contains_key(&info.id) {
            debug!(plugin_id = %info.id, "plugin already registered");
            return false;
        }
        let table = plugin.commands();
        info!(
            plugin_id = %info.id,
            version = %info.version,
            commands = table.commands().count(),
            "plugin registered"
        );
        plugins.insert(info.id.clone(), Registered { info, table });
        true
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.plugins
            .read()
            .expect("lock poisoned")
            .contains_key(plugin_id)
    }

    /// Every registered plugin, ordered by id.
    pub fn inventory(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .expect("lock poisoned")
            .values()
            .map(|r| r.info.clone())
            .collect()
    }

    /// Run one command and return its encoded reply.
    pub async fn execute(&self, plugin_id: &str, command: &str, payload: &str) -> PluginResult<String> {
        let handler = {
            let plugins = self.plugins.read().expect("lock poisoned");
            let registered = plugins
                .get(plugin_id)
                .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
            registered
                .table
                .get(command)
                .ok_or_else(|| PluginError::UnknownCommand {
                    plugin_id: plugin_id.to_string(),
                    command: command.to_string(),
                })?
        };

        match handler(payload.to_string()).await {
            Ok(reply) => {
                debug!(plugin_id, command, "plugin command executed");
                Ok(reply)
            }
            Err(e @ PluginError::User(_)) => {
                debug!(plugin_id, command, error = %e, "plugin command refused");
                Err(e)
            }
            Err(e) => {
                warn!(plugin_id, command, error = %e, "plugin command failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self
            .plugins
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("PluginRegistry").field("plugins", &ids).finish()
    }
}
