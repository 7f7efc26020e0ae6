//! In-process daemon bound to a temporary state directory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use stockdb_daemon::Daemon;
use stockdb_daemon::config::DaemonConfig;
use stockdb_daemon::errors::DaemonError;
use stockdb_daemon::manager::JobManager;
use stockdb_protocol::client::Client;
use stockdb_protocol::protocol::{Command, Response, encode_message, read_message};
use stockdb_protocol::resource::{DataCollection, Resource};
use stockdb_protocol::tracker::ConnectionTracker;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::wait_utils::wait_until;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestDaemon {
    dir: TempDir,
    socket_path: PathBuf,
    token: CancellationToken,
    tracker: Arc<ConnectionTracker>,
    manager: Arc<JobManager>,
    jobs_received: Arc<AtomicU64>,
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
}

impl TestDaemon {
    /// Start with short timeouts suitable for tests
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start after letting `configure` adjust the config
    pub async fn start_with(configure: impl FnOnce(&mut DaemonConfig)) -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let mut config = DaemonConfig::in_dir(dir.path());
        config.drain_timeout = Duration::from_secs(5);
        config.shutdown_timeout = Duration::from_secs(10);
        config.manager_shutdown_timeout = Duration::from_secs(2);
        configure(&mut config);

        let mut daemon = Daemon::new(config).map_err(std::io::Error::other)?;
        daemon.start().map_err(std::io::Error::other)?;

        let harness = Self {
            socket_path: daemon.socket_path().to_path_buf(),
            token: daemon.shutdown_token(),
            tracker: daemon.connection_tracker(),
            manager: daemon.manager(),
            jobs_received: daemon.jobs_received(),
            handle: Some(tokio::spawn(daemon.run_until(std::future::pending()))),
            dir,
        };

        let socket = harness.socket_path.clone();
        wait_until(STARTUP_TIMEOUT, || socket.exists())
            .await
            .map_err(std::io::Error::other)?;
        Ok(harness)
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn client(&self) -> Client {
        Client::new(&self.socket_path)
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn jobs_received(&self) -> u64 {
        self.jobs_received.load(Ordering::Relaxed)
    }

    /// Cancel the root token; the daemon starts draining
    pub fn request_shutdown(&self) {
        self.token.cancel();
    }

    /// Wait for the daemon task to return. Call once.
    pub async fn wait(&mut self) -> std::io::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Err(std::io::Error::other("daemon already joined"));
        };
        handle
            .await
            .map_err(std::io::Error::other)?
            .map_err(std::io::Error::other)
    }

    /// Request shutdown and wait for it to finish
    pub async fn shutdown(mut self) -> std::io::Result<()> {
        self.request_shutdown();
        self.wait().await
    }

    /// Open a connection and send all but the last byte of an apply command.
    /// The daemon sees an in-flight connection until [`PendingApply::finish`].
    pub async fn begin_apply(&self, collection: &DataCollection) -> std::io::Result<PendingApply> {
        let command = Command::apply(&Resource::DataCollection(collection.clone()))
            .map_err(std::io::Error::other)?;
        let mut bytes = encode_message(&command).map_err(std::io::Error::other)?;
        // Drop the trailing newline too, so the object is incomplete
        let tail = bytes.split_off(bytes.len() - 2);

        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(PendingApply { stream, tail })
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// An apply command that has been partly written
pub struct PendingApply {
    stream: UnixStream,
    tail: Vec<u8>,
}

impl PendingApply {
    /// Send the rest of the command and read the response
    pub async fn finish(mut self) -> std::io::Result<Response> {
        self.stream.write_all(&self.tail).await?;
        self.stream.flush().await?;
        read_message(&mut self.stream).await.map_err(std::io::Error::other)
    }
}
