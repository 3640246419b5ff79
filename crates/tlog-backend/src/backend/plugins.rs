use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tlog_engine::TlogError;
use tlog_plugin::comments::types::PLUGIN_ID as COMMENTS_PLUGIN_ID;
use tlog_plugin::{CommentsPlugin, PluginBackend, PluginError, PluginResult, RecordRef};
use tlog_store::BlobEntry;
use tlog_types::{Digest, RecordState, Token};

use super::TrustLogBackend;
use crate::config::PluginConfig;
use crate::error::{BackendError, BackendResult};

fn plugin_error(e: TlogError) -> PluginError {
    match e {
        TlogError::TreeFrozen(tree) => PluginError::RecordFrozen(tree),
        e => PluginError::backend(&e, e.is_transient()),
    }
}

/// [`PluginBackend`] view of the facade handed to plugins.
///
/// Holds a weak reference so registered plugins do not keep the backend
/// alive.
struct BackendAdapter {
    backend: Weak<TrustLogBackend>,
}

impl BackendAdapter {
    fn backend(&self) -> PluginResult<Arc<TrustLogBackend>> {
        self.backend
            .upgrade()
            .ok_or_else(|| PluginError::backend("backend dropped", false))
    }
}

#[async_trait]
impl PluginBackend for BackendAdapter {
    async fn record(&self, state: RecordState, token: &Token) -> PluginResult<Option<RecordRef>> {
        let backend = self.backend()?;
        if backend.check_open().is_err() {
            return Err(PluginError::backend(BackendError::Closed, false));
        }
        let Ok(tree) = backend.locate(state, token) else {
            return Ok(None);
        };
        let status = {
            let guard = backend.state.read().expect("lock poisoned");
            guard.inventory.status(state, token)
        };
        let Some(status) = status else {
            return Ok(None);
        };
        let index = match backend.tlog(state).record_index_latest(tree).await {
            Ok(index) => index,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(plugin_error(e)),
        };
        Ok(Some(RecordRef {
            token: *token,
            state,
            tree,
            status,
            version: index.version,
        }))
    }

    async fn blobs_save(
        &self,
        record: &RecordRef,
        entries: Vec<BlobEntry>,
    ) -> PluginResult<Vec<Digest>> {
        self.backend()?
            .tlog(record.state)
            .blobs_save(record.tree, entries)
            .await
            .map_err(plugin_error)
    }

    async fn blobs_by_descriptor(
        &self,
        record: &RecordRef,
        descriptor: &str,
    ) -> PluginResult<Vec<BlobEntry>> {
        self.backend()?
            .tlog(record.state)
            .blobs_by_descriptor(record.tree, descriptor)
            .await
            .map_err(plugin_error)
    }
}

impl TrustLogBackend {
    /// The backend as plugins see it.
    pub fn plugin_backend(self: &Arc<Self>) -> Arc<dyn PluginBackend> {
        Arc::new(BackendAdapter {
            backend: Arc::downgrade(self),
        })
    }

    /// Construct and register every configured plugin.
    pub fn register_configured_plugins(self: &Arc<Self>, configs: &[PluginConfig]) -> BackendResult<()> {
        for config in configs {
            let plugin = match config.id.as_str() {
                COMMENTS_PLUGIN_ID => CommentsPlugin::new(
                    self.plugin_backend(),
                    self.identity(),
                    &config.settings,
                )?,
                other => return Err(BackendError::Config(format!("unknown plugin `{other}`"))),
            };
            if !self.register_plugin(Arc::new(plugin))? {
                return Err(BackendError::Config(format!(
                    "plugin `{}` configured twice",
                    config.id
                )));
            }
        }
        Ok(())
    }
}
