//! Daemon configuration.
//!
//! Loaded from an optional YAML file; every field has a default so an empty
//! or missing file yields a working daemon rooted at the state directory
//! (`~/.stockdb`, or `$STOCKDB_HOME` when set).

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DaemonError, Result};
use crate::logging::LogConfig;

pub use duration::{format_duration, parse_duration};

/// Overrides the state directory
pub const STATE_DIR_ENV: &str = "STOCKDB_HOME";

const STATE_DIR_NAME: &str = ".stockdb";
const SOCKET_FILE: &str = "stockd.sock";
const DATABASE_FILE: &str = "manager_jobs.db";

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_UPSTREAM_URL: &str = "https://financialmodelingprep.com/stable";

/// Directory holding the socket and the job database
pub fn state_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .ok_or(DaemonError::NoHomeDirectory)
}

pub fn default_socket_path() -> Result<PathBuf> {
    Ok(state_dir()?.join(SOCKET_FILE))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// How long the socket server waits for in-flight connections
    #[serde(with = "duration")]
    pub drain_timeout: Duration,
    /// Upper bound on waiting for all services to stop
    #[serde(with = "duration")]
    pub shutdown_timeout: Duration,
    #[serde(with = "duration")]
    pub manager_shutdown_timeout: Duration,
    pub queue: QueueConfig,
    pub upstream: UpstreamConfig,
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            database_path: None,
            drain_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(45),
            manager_shutdown_timeout: Duration::from_secs(10),
            queue: QueueConfig::default(),
            upstream: UpstreamConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            rate_limit: None,
        }
    }
}

/// Token bucket admission for the job queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub per_second: u32,
    /// Defaults to `per_second`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Total attempts per request
    pub retries: u32,
    #[serde(with = "duration")]
    pub retry_delay: Duration,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_millis(500),
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
        }
    }
}

impl DaemonConfig {
    /// Load and validate a config file. An empty file is the default config.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DaemonError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse config text; `origin` only labels errors.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let de = serde_yaml::Deserializer::from_str(contents);
        let config: Self =
            serde_path_to_error::deserialize(de).map_err(|e| DaemonError::ConfigParse {
                path: origin.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Config rooted at `dir` instead of the state directory
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            socket_path: Some(dir.join(SOCKET_FILE)),
            database_path: Some(dir.join(DATABASE_FILE)),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = &self.queue.rate_limit {
            if limit.per_second == 0 {
                return Err(DaemonError::Config(
                    "queue.rate_limit.per_second must be greater than 0".into(),
                ));
            }
            if limit.burst == Some(0) {
                return Err(DaemonError::Config(
                    "queue.rate_limit.burst must be greater than 0".into(),
                ));
            }
        }
        if self.upstream.retries == 0 {
            return Err(DaemonError::Config("upstream.retries must be at least 1".into()));
        }
        if self.log.level.trim().is_empty() {
            return Err(DaemonError::Config("log.level must not be empty".into()));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => default_socket_path(),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(state_dir()?.join(DATABASE_FILE)),
        }
    }
}
