use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tlog_client::RetryPolicy;
use tlog_engine::AnchorConfig;
use tlog_plugin::PluginSetting;

use crate::error::{BackendError, BackendResult};

/// Backend configuration, loaded from TOML.
///
/// ```toml
/// data_dir = "/var/lib/tlogd"
/// log_level = "info"
///
/// [anchor]
/// interval_secs = 3600
///
/// [[plugins]]
/// id = "comments"
/// settings = [{ key = "votechangesmax", value = "3" }]
/// ```
///
/// Key file paths that are relative resolve against `data_dir`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub data_dir: PathBuf,
    /// 32 raw bytes. Created with a random key when absent.
    pub encryption_key_file: PathBuf,
    /// Hex-encoded Ed25519 secret. Created when absent.
    pub identity_key_file: PathBuf,
    pub log_level: String,
    pub anchor: AnchorConfig,
    /// Bounds for log service calls.
    pub retry: RetryPolicy,
    pub plugins: Vec<PluginConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default)]
    pub settings: Vec<PluginSetting>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            encryption_key_file: PathBuf::from("tlogbe.key"),
            identity_key_file: PathBuf::from("identity.key"),
            log_level: "info".into(),
            anchor: AnchorConfig::default(),
            retry: RetryPolicy::default(),
            plugins: Vec::new(),
        }
    }
}

impl BackendConfig {
    pub fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| BackendError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> BackendResult<Self> {
        toml::from_str(text).map_err(|e| BackendError::Config(e.to_string()))
    }

    pub fn unvetted_dir(&self) -> PathBuf {
        self.data_dir.join("unvetted")
    }

    pub fn vetted_dir(&self) -> PathBuf {
        self.data_dir.join("vetted")
    }

    pub fn encryption_key_path(&self) -> PathBuf {
        self.data_dir.join(&self.encryption_key_file)
    }

    pub fn identity_key_path(&self) -> PathBuf {
        self.data_dir.join(&self.identity_key_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = BackendConfig::default();
        assert_eq!(c.data_dir, PathBuf::from("data"));
        assert_eq!(c.unvetted_dir(), PathBuf::from("data/unvetted"));
        assert_eq!(c.encryption_key_path(), PathBuf::from("data/tlogbe.key"));
        assert!(c.anchor.enabled);
        assert!(c.plugins.is_empty());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = BackendConfig::from_toml(
            r#"
            data_dir = "/srv/tlog"
            identity_key_file = "/etc/tlog/id.key"

            [anchor]
            interval_secs = 60

            [retry]
            attempts = 5

            [[plugins]]
            id = "comments"
            settings = [{ key = "votechangesmax", value = "3" }]
            "#,
        )
        .unwrap();
        assert_eq!(c.vetted_dir(), PathBuf::from("/srv/tlog/vetted"));
        // An absolute path replaces data_dir on join.
        assert_eq!(c.identity_key_path(), PathBuf::from("/etc/tlog/id.key"));
        assert_eq!(c.anchor.interval_secs, 60);
        assert_eq!(c.anchor.confirm_attempts, 30);
        assert_eq!(c.retry.attempts, 5);
        assert_eq!(c.retry.timeout_ms, RetryPolicy::default().timeout_ms);
        assert_eq!(c.plugins[0].settings, vec![PluginSetting::new("votechangesmax", "3")]);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = BackendConfig::from_toml("data_dir = [").unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlogd.toml");
        fs::write(&path, "log_level = \"debug\"\n").unwrap();
        assert_eq!(BackendConfig::load(&path).unwrap().log_level, "debug");
        assert!(BackendConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
