#[cfg(not(unix))]
compile_error!("stockdb-protocol server requires a unix target for the control socket");

use std::future::Future;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream, unix::SocketAddr};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::{ProtocolError, ServerError};
use crate::protocol::{Command, Request, Response, read_message, write_message};
use crate::tracker::{ConnectionGuard, ConnectionTracker};

pub type Result<T> = std::result::Result<T, ServerError>;

/// How long a stopping server waits for in-flight connections
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owner and group may read/write the socket, nobody else
const SOCKET_MODE: u32 = 0o660;

const SOCKET_DIR_MODE: u32 = 0o755;

/// The daemon's listening Unix socket and the file backing it.
///
/// The socket file is removed when the `ControlSocket` is closed or dropped,
/// whichever comes first.
#[derive(Debug)]
pub struct ControlSocket {
    path: PathBuf,
    listener: UnixListener,
    removed: bool,
}

impl ControlSocket {
    /// Bind the control socket at `path`.
    ///
    /// A stale socket file left behind by a previous run is removed first.
    /// Must be called from within a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ServerError::EmptySocketPath);
        }

        remove_stale_socket(&path);

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(SOCKET_DIR_MODE)
                .create(dir)
                .map_err(|e| ServerError::SocketDirectory {
                    dir: dir.to_path_buf(),
                    source: e,
                })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| ServerError::Bind {
            socket_path: path.clone(),
            source: e,
        })?;

        // From here on, dropping `socket` cleans up the file
        let socket = Self {
            path,
            listener,
            removed: false,
        };

        std::fs::set_permissions(&socket.path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(|e| ServerError::SocketPermissions {
                socket_path: socket.path.clone(),
                source: e,
            })?;

        Ok(socket)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> std::io::Result<(UnixStream, SocketAddr)> {
        self.listener.accept().await
    }

    /// Stop listening and remove the socket file.
    pub fn close(mut self) -> std::io::Result<()> {
        self.remove_file()
    }

    fn remove_file(&mut self) -> std::io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed socket file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove socket file {}: {}", self.path.display(), e);
                Err(e)
            }
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        let _ = self.remove_file();
    }
}

fn remove_stale_socket(path: &Path) {
    match std::fs::symlink_metadata(path) {
        Ok(_) => match std::fs::remove_file(path) {
            Ok(()) => info!("Removed stale socket file {}", path.display()),
            Err(e) => warn!("Stale socket file {} cannot be deleted: {}", path.display(), e),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Cannot inspect socket path {}: {}", path.display(), e),
    }
}

pub struct Server<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    socket: ControlSocket,
    handler: Arc<F>,
    tracker: Arc<ConnectionTracker>,
    drain_timeout: Duration,
}

impl<F, Fut> Server<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    /// Bind the control socket. Failure here is fatal to daemon startup.
    pub fn bind(socket_path: impl Into<PathBuf>, handler: F) -> Result<Self> {
        Ok(Self {
            socket: ControlSocket::bind(socket_path)?,
            handler: Arc::new(handler),
            tracker: ConnectionTracker::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        })
    }

    pub fn with_tracker(mut self, tracker: Arc<ConnectionTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn tracker(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn socket_path(&self) -> &Path {
        self.socket.path()
    }

    /// Serve connections until `shutdown` is cancelled, then drain and clean up.
    ///
    /// Drain failures are logged, never returned. The socket file is removed
    /// on every path out of this function.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Control socket listening on {}", self.socket.path().display());

        self.accept_loop(&shutdown).await;

        info!("Server shutdown initiated");
        match self.tracker.drain(self.drain_timeout).await {
            Ok(()) => info!("Drain completed successfully"),
            Err(e) => warn!("Drain failed to complete: {}", e),
        }

        let socket_path = self.socket.path().to_path_buf();
        self.socket.close().map_err(|e| ServerError::Cleanup {
            socket_path,
            source: e,
        })
    }

    async fn accept_loop(&self, shutdown: &CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Acceptor stopped");
                    return;
                }
                result = self.socket.accept() => match result {
                    Ok((stream, addr)) => {
                        // Registered before the task is spawned so a drain can never miss it
                        let guard = self.tracker.track(describe_peer(&addr));
                        let handler = Arc::clone(&self.handler);
                        tokio::spawn(handle_connection(handler, stream, guard));
                    }
                    Err(e) => {
                        if shutdown.is_cancelled() {
                            return;
                        }
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

fn describe_peer(addr: &SocketAddr) -> String {
    match addr.as_pathname() {
        Some(path) => path.display().to_string(),
        None => "unnamed".to_string(),
    }
}

fn record_peer_credentials(stream: &UnixStream, guard: &ConnectionGuard) {
    match stream.peer_cred() {
        Ok(cred) => {
            guard.set_attribute("peer_uid", cred.uid().to_string());
            guard.set_attribute("peer_gid", cred.gid().to_string());
            if let Some(pid) = cred.pid() {
                guard.set_attribute("peer_pid", pid.to_string());
            }
        }
        Err(e) => debug!("Failed to read peer credentials: {}", e),
    }
}

/// Serve exactly one request/response exchange, then close the connection.
async fn handle_connection<F, Fut>(handler: Arc<F>, mut stream: UnixStream, guard: ConnectionGuard)
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let connection_id = guard.id();
    record_peer_credentials(&stream, &guard);

    let response = match read_message::<Command, _>(&mut stream).await {
        Ok(command) => {
            debug!(connection_id, kind = %command.kind, "Received command");
            match Request::try_from(command) {
                Ok(request) => {
                    let name = request.variant_name();
                    let response = handler(request).await;
                    debug!(
                        connection_id,
                        request = name,
                        response = %response.kind,
                        "Handled request"
                    );
                    response
                }
                Err(e) => {
                    debug!(connection_id, "Rejected command payload: {}", e);
                    Response::error(e.to_string())
                }
            }
        }
        Err(ProtocolError::UnexpectedEof) => {
            // Nothing at all was sent, as from `Client::is_daemon_running`.
            // A partial message is `Truncated` and still gets an error response.
            debug!(connection_id, "Client disconnected before sending a command");
            return;
        }
        Err(e) => {
            warn!(connection_id, "Error decoding command: {}", e);
            Response::error(format!("failed to decode command: {}", e))
        }
    };

    if let Err(e) = write_message(&mut stream, &response).await {
        debug!(connection_id, "Failed to send response: {}", e);
    }
    let _ = stream.shutdown().await;

    drop(stream);
    guard.finish();
}

#[cfg(test)]
mod tests;
