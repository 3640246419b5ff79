use std::fs;
use std::sync::Arc;

use anyhow::Context;
use tlog_backend::{
    load_or_create_encryption_key, load_or_create_identity, BackendConfig, TlogParts,
    TrustLogBackend,
};
use tlog_client::{InMemoryLogClient, InMemoryTimestamper};
use tlog_engine::AnchorScheduler;
use tlog_store::FileSystemBlobStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Open the stores, keys and logs under `config.data_dir` and build the
/// backend with its configured plugins. The inventory is rebuilt before
/// returning.
pub async fn open_backend(config: &BackendConfig) -> anyhow::Result<Arc<TrustLogBackend>> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;

    let key = load_or_create_encryption_key(&config.encryption_key_path())
        .context("loading encryption key")?;
    let identity =
        load_or_create_identity(&config.identity_key_path()).context("loading identity key")?;

    let unvetted_store = FileSystemBlobStore::open(config.unvetted_dir())
        .with_context(|| format!("opening {}", config.unvetted_dir().display()))?;
    let vetted_store = FileSystemBlobStore::open(config.vetted_dir())
        .with_context(|| format!("opening {}", config.vetted_dir().display()))?;

    // Log trees live in process memory; blobs persist on disk.
    warn!("using in-memory log service, tree history is lost on exit");
    let unvetted = TlogParts {
        log: Arc::new(InMemoryLogClient::new()),
        store: Arc::new(unvetted_store),
    };
    let vetted = TlogParts {
        log: Arc::new(InMemoryLogClient::new()),
        store: Arc::new(vetted_store),
    };

    let backend = Arc::new(TrustLogBackend::new(
        unvetted,
        vetted,
        Arc::new(key),
        Arc::new(identity),
        config.retry.clone(),
    ));
    backend
        .register_configured_plugins(&config.plugins)
        .context("registering plugins")?;

    let records = backend
        .rebuild_inventory()
        .await
        .context("rebuilding inventory")?;
    info!(
        records,
        identity = %backend.identity_public_key().to_hex(),
        "backend ready"
    );
    Ok(backend)
}

/// Run until `shutdown` resolves, then stop the anchor scheduler and close
/// the backend.
pub async fn run<F>(config: BackendConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let backend = open_backend(&config).await?;

    let scheduler = AnchorScheduler::new(
        backend.tlogs(),
        Arc::new(InMemoryTimestamper::default()),
        config.anchor.clone(),
    );
    let cancel = CancellationToken::new();
    let anchors = tokio::spawn({
        let cancel = cancel.clone();
        async move { scheduler.run(cancel).await }
    });

    shutdown.await;
    info!("shutting down");

    cancel.cancel();
    if let Err(e) = anchors.await {
        warn!(error = %e, "anchor scheduler task failed");
    }
    backend.close().context("closing backend")?;
    info!("backend closed");
    Ok(())
}

/// Hex-encoded identity public key, creating the key file if needed.
pub fn identity(config: &BackendConfig) -> anyhow::Result<String> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let key = load_or_create_identity(&config.identity_key_path())
        .context("loading identity key")?;
    Ok(key.verifying_key().to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(dir: &std::path::Path) -> BackendConfig {
        BackendConfig {
            data_dir: dir.to_path_buf(),
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn open_creates_keys_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());

        let backend = open_backend(&config).await.unwrap();
        assert!(config.encryption_key_path().exists());
        assert!(config.identity_key_path().exists());
        assert!(config.unvetted_dir().is_dir());
        assert!(config.vetted_dir().is_dir());
        assert!(backend.inventory().is_empty());
        backend.close().unwrap();
    }

    #[tokio::test]
    async fn identity_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());

        let first = identity(&config).unwrap();
        let backend = open_backend(&config).await.unwrap();
        assert_eq!(backend.identity_public_key().to_hex(), first);
        assert_eq!(identity(&config).unwrap(), first);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = make_config(dir.path());
        run(config, async {}).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_plugin_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = make_config(dir.path());
        config.plugins.push(tlog_backend::PluginConfig {
            id: "ticketvote".into(),
            settings: Vec::new(),
        });
        let err = open_backend(&config).await.unwrap_err();
        assert!(format!("{err:#}").contains("ticketvote"));
    }
}
