use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stockdb_daemon::Daemon;
use stockdb_daemon::config::DaemonConfig;
use stockdb_daemon::logging;

/// stockd - stockdb control-plane daemon
#[derive(Parser)]
#[command(
    name = "stockd",
    version,
    about = "Control-plane daemon for stockdb data collection jobs"
)]
struct Args {
    /// YAML config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path (overrides the config file)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `stockdb_daemon=trace` (overrides the config file)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = Some(socket);
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    logging::init(&config.log)?;

    let daemon = Daemon::new(config).context("failed to initialize daemon")?;
    daemon.run().await?;

    Ok(())
}
