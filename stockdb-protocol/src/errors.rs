use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message exceeds maximum size of {max} bytes")]
    MessageTooLarge { max: usize },

    #[error("connection closed before any message was received")]
    UnexpectedEof,

    #[error("connection closed after {received} bytes of an incomplete message")]
    Truncated { received: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} command requires a resource in `data`")]
    MissingPayload { command: &'static str },

    #[error("invalid resource payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to daemon at {socket_path}: {source}")]
    Connect {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send command: {0}")]
    Send(#[source] ProtocolError),

    #[error("failed to receive response: {0}")]
    Receive(#[source] ProtocolError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket path is not set")]
    EmptySocketPath,

    #[error("cannot create socket directory {dir}: {source}")]
    SocketDirectory {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind unix socket at {socket_path}: {source}")]
    Bind {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set socket permissions at {socket_path}: {source}")]
    SocketPermissions {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove socket file {socket_path}: {source}")]
    Cleanup {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("wait cancelled after {timeout:?} with {remaining} connections still active")]
    DrainTimeout { remaining: usize, timeout: Duration },
}
