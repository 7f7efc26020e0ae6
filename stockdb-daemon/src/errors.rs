use std::path::PathBuf;
use std::time::Duration;

use stockdb_protocol::errors::ServerError;
use thiserror::Error;

/// Format a YAML error for display, including the field path and location
pub fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = match inner.location() {
        Some(loc) => format!("line {}, column {}: {}", loc.line(), loc.column(), msg),
        None => msg,
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("job queue is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create database directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode job spec: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unsupported schedule type '{0}'")]
    ScheduleType(String),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid resource: {0}")]
    Invalid(String),

    #[error("failed to persist job {job_id}: {source}")]
    Store {
        job_id: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to enqueue job {job_id}: {source}")]
    Queue {
        job_id: String,
        #[source]
        source: QueueError,
    },

    #[error("manager is shutting down")]
    ShuttingDown,

    #[error("manager shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    #[error("retry count must be at least 1")]
    NoAttempts,
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Could not determine home directory, set STOCKDB_HOME")]
    NoHomeDirectory,

    #[error("Daemon already started")]
    AlreadyStarted,

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("{service} service failed: {message}")]
    Service { service: &'static str, message: String },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Manager(#[from] ManagerError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
