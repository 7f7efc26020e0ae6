use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}:\n  {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Cannot determine daemon socket path: {0}")]
    SocketPath(String),

    #[error("Daemon is not running at {0}. Start it with: stockd")]
    DaemonNotRunning(PathBuf),

    #[error("{0}")]
    Server(String),

    #[error("Unexpected response from daemon: {0}")]
    Unexpected(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] stockdb_protocol::errors::ClientError),
}

pub type Result<T> = std::result::Result<T, CliError>;
