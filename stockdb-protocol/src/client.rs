use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use crate::errors::ClientError;
use crate::protocol::{Command, Response, read_message, write_message};
use crate::resource::{DataCollection, Resource};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for the daemon's control socket.
///
/// The daemon serves one command per connection, so every call opens a
/// fresh connection and closes it after the response arrives.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one command and wait for its response
    pub async fn send(&self, command: &Command) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| ClientError::Connect {
                socket_path: self.socket_path.clone(),
                source: e,
            })?;

        debug!(kind = %command.kind, "Sending command to {}", self.socket_path.display());
        write_message(&mut stream, command)
            .await
            .map_err(ClientError::Send)?;

        let response = read_message(&mut stream)
            .await
            .map_err(ClientError::Receive)?;
        let _ = stream.shutdown().await;

        Ok(response)
    }

    /// Apply a data collection, tagging the command with `parameters`
    pub async fn apply(
        &self,
        collection: &DataCollection,
        parameters: HashMap<String, String>,
    ) -> Result<Response> {
        let mut command = Command::apply(&Resource::DataCollection(collection.clone()))?;
        command.parameters = parameters;
        self.send(&command).await
    }

    /// Check whether a daemon is accepting connections at `socket_path`
    pub async fn is_daemon_running(socket_path: &Path) -> bool {
        UnixStream::connect(socket_path).await.is_ok()
    }
}
