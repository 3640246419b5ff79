use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tlog_backend::BackendConfig;

#[derive(Debug, Parser)]
#[command(name = "tlogd", about = "Trust log backend daemon", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Overrides `log_level` from the configuration file
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the backend until interrupted (the default)
    Run,
    /// Print the backend identity public key, creating the key if needed
    Identity,
}

impl Cli {
    /// The configuration file, if any, with command line overrides applied.
    pub fn load_config(&self) -> anyhow::Result<BackendConfig> {
        let mut config = match &self.config {
            Some(path) => BackendConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BackendConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlogd.toml");
        std::fs::write(&path, "data_dir = \"/srv/tlog\"\nlog_level = \"warn\"\n").unwrap();

        let cli = Cli::parse_from([
            "tlogd",
            "--config",
            path.to_str().unwrap(),
            "--log-level",
            "debug",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/tlog"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(cli.command, None);
    }

    #[test]
    fn identity_subcommand_parses() {
        let cli = Cli::parse_from(["tlogd", "identity", "--data-dir", "/tmp/t"]);
        assert_eq!(cli.command, Some(Command::Identity));
        assert_eq!(cli.load_config().unwrap().data_dir, PathBuf::from("/tmp/t"));
    }
}
