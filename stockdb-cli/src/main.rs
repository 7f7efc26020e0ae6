mod commands;
mod config;
mod errors;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{commands::Commands, errors::{CliError, Result}};
use clap::Parser;
use colored::Colorize;
use stockdb_daemon::logging::{self, LogConfig, LogFormat};
use stockdb_protocol::{
    client::Client,
    errors::ClientError,
    protocol::{Response, ResponseKind},
    resource::DataCollection,
};
use tracing::debug;

/// stockctl - control the stockdb daemon
#[derive(Parser, Debug)]
#[command(name = "stockctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Daemon control socket (defaults to ~/.stockdb/stockd.sock)
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&LogConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        format: LogFormat::Compact,
    })
    .map_err(|e| CliError::Logging(e.to_string()))?;

    let socket_path = config::resolve_socket_path(cli.socket.as_deref())?;
    let client = Client::new(&socket_path);

    match cli.command {
        Commands::Apply { file } => {
            let collection = config::load_collection(&file)?;
            let response = apply(&client, &collection, &file).await?;
            println!("{}", handle_response(&collection, response)?);
        }
    }

    Ok(())
}

async fn apply(client: &Client, collection: &DataCollection, file: &Path) -> Result<Response> {
    let mut parameters = HashMap::new();
    let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
    parameters.insert("file".to_string(), file.display().to_string());

    debug!(name = collection.name(), "Applying {}", file.display());
    match client.apply(collection, parameters).await {
        Ok(response) => Ok(response),
        Err(ClientError::Connect { socket_path, .. }) => {
            Err(CliError::DaemonNotRunning(socket_path))
        }
        Err(e) => Err(e.into()),
    }
}

/// Success line for the user, or the error the process exits with
fn handle_response(collection: &DataCollection, response: Response) -> Result<String> {
    match response.kind {
        ResponseKind::Success => {
            let id = if response.message.is_empty() {
                collection.name()
            } else {
                response.message.as_str()
            };
            Ok(format!(
                "{}/{} {}",
                collection.kind.as_str(),
                id,
                "applied".green()
            ))
        }
        ResponseKind::Error => Err(CliError::Server(response.message)),
        ResponseKind::Unknown => Err(CliError::Unexpected(response.message)),
    }
}

#[cfg(test)]
mod tests;
