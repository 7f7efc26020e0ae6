//! Top-level daemon: owns the root cancellation token, runs the long-lived
//! services and drives graceful shutdown.

use std::future::Future;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use stockdb_protocol::protocol::Request;
use stockdb_protocol::server::Server;
use stockdb_protocol::tracker::ConnectionTracker;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{DaemonConfig, RateLimitConfig};
use crate::errors::{DaemonError, Result};
use crate::handlers::handle_request;
use crate::jobqueue::{
    InputJobQueue, JobReceiver, OutputJobQueue, RateLimitedInputJobQueue, UnifiedJobQueue,
};
use crate::manager::JobManager;
use crate::store::JobStore;
use crate::upstream::FmpClient;

/// Capacity of the channel services use to report fatal errors
const ERROR_CHANNEL_SIZE: usize = 10;

pub struct Daemon {
    config: DaemonConfig,
    socket_path: PathBuf,
    token: CancellationToken,
    services: TaskTracker,
    tracker: Arc<ConnectionTracker>,
    queue: Arc<UnifiedJobQueue>,
    manager: Arc<JobManager>,
    /// Built at startup so a bad upstream config fails early. Nothing calls it
    /// until job execution is attached to the intake loop.
    upstream: Option<FmpClient>,
    jobs_received: Arc<AtomicU64>,
    errors_tx: mpsc::Sender<DaemonError>,
    errors_rx: Option<mpsc::Receiver<DaemonError>>,
    started: bool,
}

impl Daemon {
    /// Open the job store and wire queue and manager. Nothing is listening yet.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let socket_path = config.socket_path()?;
        let store = Arc::new(JobStore::open(config.database_path()?)?);

        let token = CancellationToken::new();
        let queue = Arc::new(UnifiedJobQueue::new(config.queue.capacity));
        let input = admission_queue(Arc::clone(&queue), config.queue.rate_limit.as_ref());
        let manager = Arc::new(JobManager::new(store, input, &token));

        let upstream = FmpClient::from_config(&config.upstream)
            .map_err(|e| DaemonError::Config(format!("upstream: {}", e)))?;
        if upstream.is_none() {
            debug!("No upstream API key configured");
        }

        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_SIZE);

        Ok(Self {
            config,
            socket_path,
            token,
            services: TaskTracker::new(),
            tracker: ConnectionTracker::new(),
            queue,
            manager,
            upstream,
            jobs_received: Arc::new(AtomicU64::new(0)),
            errors_tx,
            errors_rx: Some(errors_rx),
            started: false,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn connection_tracker(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn manager(&self) -> Arc<JobManager> {
        Arc::clone(&self.manager)
    }

    pub fn upstream(&self) -> Option<&FmpClient> {
        self.upstream.as_ref()
    }

    /// Cancelling this token makes a running daemon shut down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Jobs taken off the queue by the intake service so far
    pub fn jobs_received(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.jobs_received)
    }

    /// Bind the control socket and launch all services.
    ///
    /// Bind and permission failures are returned here and abort startup.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(DaemonError::AlreadyStarted);
        }
        info!(pid = std::process::id(), "Starting daemon");

        let manager = Arc::clone(&self.manager);
        let server = Server::bind(&self.socket_path, move |request: Request| {
            let manager = Arc::clone(&manager);
            async move { handle_request(request, &manager).await }
        })?
        .with_tracker(Arc::clone(&self.tracker))
        .with_drain_timeout(self.config.drain_timeout);

        let token = self.token.clone();
        let errors = self.errors_tx.clone();
        self.services.spawn(async move {
            if let Err(e) = server.run(token.clone()).await {
                if token.is_cancelled() {
                    error!("Socket server cleanup failed: {}", e);
                } else {
                    report(&errors, DaemonError::Service {
                        service: "socket server",
                        message: e.to_string(),
                    })
                    .await;
                }
            }
        });

        let output = self.queue.output().map_err(|e| DaemonError::Service {
            service: "job intake",
            message: e.to_string(),
        })?;
        self.services.spawn(run_job_intake(
            output,
            self.token.clone(),
            Arc::clone(&self.jobs_received),
        ));

        self.started = true;
        Ok(())
    }

    /// Run until SIGINT or SIGTERM, then shut down.
    pub async fn run(self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate()).map_err(DaemonError::Signal)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(DaemonError::Signal)?;

        self.run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            }
        })
        .await
    }

    /// Run until `shutdown_signal` completes, a service fails, or the
    /// shutdown token is cancelled. Starts the daemon first if needed.
    ///
    /// A service failure is returned after shutdown has completed.
    pub async fn run_until<S>(mut self, shutdown_signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        if !self.started {
            self.start()?;
        }
        let Some(mut errors) = self.errors_rx.take() else {
            return Err(DaemonError::AlreadyStarted);
        };

        let failure = tokio::select! {
            _ = shutdown_signal => None,
            _ = self.token.cancelled() => {
                info!("Shutdown requested");
                None
            }
            Some(e) = errors.recv() => {
                error!("{}", e);
                Some(e)
            }
        };

        self.shutdown().await;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop all services. Waits at most `shutdown_timeout` for them; a
    /// timeout is logged and the remaining work is left to finish on its own.
    pub async fn shutdown(&self) {
        info!("Shutting down daemon");
        self.token.cancel();
        self.services.close();

        match tokio::time::timeout(self.config.shutdown_timeout, self.services.wait()).await {
            Ok(()) => info!("All services stopped"),
            Err(_) => error!(
                timeout = ?self.config.shutdown_timeout,
                remaining = self.services.len(),
                "Shutdown timed out"
            ),
        }

        if let Err(e) = self.manager.shutdown(self.config.manager_shutdown_timeout).await {
            warn!("{}", e);
        }
        info!("Shutdown complete");
    }
}

fn admission_queue(
    queue: Arc<UnifiedJobQueue>,
    rate_limit: Option<&RateLimitConfig>,
) -> Arc<dyn InputJobQueue> {
    let Some(limit) = rate_limit else {
        return queue;
    };
    let Some(rate) = NonZeroU32::new(limit.per_second) else {
        return queue;
    };
    let burst = limit.burst.and_then(NonZeroU32::new).unwrap_or(rate);
    info!(per_second = rate.get(), burst = burst.get(), "Job admission is rate limited");
    Arc::new(RateLimitedInputJobQueue::per_second(queue, rate, burst))
}

async fn report(errors: &mpsc::Sender<DaemonError>, error: DaemonError) {
    if errors.send(error).await.is_err() {
        debug!("Error channel closed, daemon is already stopping");
    }
}

/// Take accepted jobs off the queue. Job execution attaches here.
async fn run_job_intake(output: JobReceiver, token: CancellationToken, received: Arc<AtomicU64>) {
    info!("Job intake started");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            job = output.recv() => match job {
                Some(job) => {
                    let total = received.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        job_id = job.id(),
                        status = %job.status,
                        total,
                        "Job received"
                    );
                }
                None => break,
            },
        }
    }
    info!("Job intake stopped");
}
