use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stockdb_daemon::errors::format_yaml_error;
use stockdb_protocol::resource::DataCollection;

use crate::errors::{CliError, Result};

/// `--socket` when given, otherwise the daemon's default socket
pub fn resolve_socket_path(socket: Option<&Path>) -> Result<PathBuf> {
    match socket {
        Some(path) => Ok(path.to_path_buf()),
        None => stockdb_daemon::config::default_socket_path()
            .map_err(|e| CliError::SocketPath(e.to_string())),
    }
}

/// Read and parse a data collection file
pub fn load_collection(path: &Path) -> Result<DataCollection> {
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CliError::FileNotFound(path.to_path_buf()),
        _ => CliError::FileRead {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    parse_collection(&contents, path)
}

pub fn parse_collection(contents: &str, origin: &Path) -> Result<DataCollection> {
    let de = serde_yaml::Deserializer::from_str(contents);
    serde_path_to_error::deserialize(de).map_err(|e| CliError::Parse {
        path: origin.to_path_buf(),
        message: format_yaml_error(&e),
    })
}
