mod cli;
mod daemon;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let level: tracing::Level = config
        .log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level `{}`", config.log_level))?;
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            daemon::run(config, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "waiting for ctrl-c");
                }
            })
            .await
        }
        Command::Identity => {
            println!("{}", daemon::identity(&config)?);
            Ok(())
        }
    }
}
