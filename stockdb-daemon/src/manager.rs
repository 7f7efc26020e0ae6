use std::sync::Arc;
use std::time::Duration;

use stockdb_protocol::resource::{DataCollection, Resource, ResourceKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::parse_duration;
use crate::errors::ManagerError;
use crate::jobqueue::InputJobQueue;
use crate::jobs::Job;
use crate::store::{JobStore, NewJob, Upserted, parse_schedule_date};

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Accepts resources: validates, persists, and enqueues them as jobs.
pub struct JobManager {
    store: Arc<JobStore>,
    queue: Arc<dyn InputJobQueue>,
    token: CancellationToken,
    in_flight: TaskTracker,
}

impl JobManager {
    /// The manager stops admitting jobs once `parent` is cancelled.
    pub fn new(
        store: Arc<JobStore>,
        queue: Arc<dyn InputJobQueue>,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            store,
            queue,
            token: parent.child_token(),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Saves currently in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Validate, persist and enqueue `resource`. Returns the job id.
    pub async fn save_resource(&self, resource: Resource) -> Result<String> {
        if self.in_flight.is_closed() {
            return Err(ManagerError::ShuttingDown);
        }
        self.in_flight.track_future(self.save(resource)).await
    }

    /// A stored row always means the job was enqueued: nothing is written
    /// once the manager is cancelled, and a failed enqueue reverts the write.
    async fn save(&self, resource: Resource) -> Result<String> {
        let row = match &resource {
            Resource::DataCollection(collection) => {
                validate_collection(collection)?;
                NewJob::from_collection(collection).map_err(|e| ManagerError::Store {
                    job_id: collection.name().to_string(),
                    source: e,
                })?
            }
        };
        let job_id = row.job_id.clone();
        if self.token.is_cancelled() {
            return Err(ManagerError::ShuttingDown);
        }
        info!(job_id, kind = %resource.kind(), "Saving resource");

        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || store.upsert(&row))
            .await
            .map_err(|e| ManagerError::Internal(format!("store task failed: {}", e)))?
            .map_err(|e| ManagerError::Store {
                job_id: job_id.clone(),
                source: e,
            })?;

        if let Err(e) = self.queue.add(&self.token, Job::new(resource)).await {
            self.revert(&job_id, outcome).await;
            return Err(ManagerError::Queue { job_id, source: e });
        }

        info!(job_id, outcome = outcome.as_str(), "Resource accepted");
        Ok(job_id)
    }

    async fn revert(&self, job_id: &str, outcome: Upserted) {
        let store = Arc::clone(&self.store);
        let id = job_id.to_string();
        match tokio::task::spawn_blocking(move || store.revert(&id, &outcome)).await {
            Ok(Ok(())) => debug!(job_id, "Reverted job that could not be enqueued"),
            Ok(Err(e)) => error!(job_id, "Failed to revert job: {}", e),
            Err(e) => error!(job_id, "Revert task failed: {}", e),
        }
    }

    /// Stop admitting work and wait for in-flight saves.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down job manager");
        self.token.cancel();
        self.in_flight.close();

        match tokio::time::timeout(timeout, self.in_flight.wait()).await {
            Ok(()) => {
                info!("Job manager stopped");
                Ok(())
            }
            Err(_) => {
                warn!(remaining = self.in_flight.len(), "Job manager shutdown timed out");
                Err(ManagerError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Check a data collection before it is stored. All problems are reported at once.
pub fn validate_collection(collection: &DataCollection) -> Result<()> {
    let mut problems = Vec::new();

    if collection.kind == ResourceKind::Unknown {
        debug!(
            name = collection.name(),
            "Resource kind not recognized, treating as DataCollection"
        );
    }

    if collection.name().trim().is_empty() {
        problems.push("metadata.name is required".to_string());
    }

    let schedule = &collection.spec.schedule;
    if !schedule.schedule_type.is_known() {
        problems.push("spec.schedule.type must be 'interval' or 'recurring'".to_string());
    }

    let start = match schedule.start_date.as_deref() {
        Some(s) => match parse_schedule_date(s) {
            Some(date) => Some(date),
            None => {
                problems.push(format!("spec.schedule.startDate '{}' is not a valid date", s));
                None
            }
        },
        None => None,
    };
    let end = match schedule.end_date.as_deref() {
        Some(s) => match parse_schedule_date(s) {
            Some(date) => Some(date),
            None => {
                problems.push(format!("spec.schedule.endDate '{}' is not a valid date", s));
                None
            }
        },
        None => None,
    };
    if let (Some(start), Some(end)) = (start, end)
        && end < start
    {
        problems.push("spec.schedule.endDate is before startDate".to_string());
    }

    let securities = &collection.spec.targets.securities;
    if securities.is_empty() {
        problems.push("spec.targets.securities must list at least one symbol".to_string());
    }
    if securities.iter().any(|s| s.symbol.trim().is_empty()) {
        problems.push("spec.targets.securities contains an empty symbol".to_string());
    }

    let timeout = collection.spec.options.timeout.trim();
    if !timeout.is_empty()
        && let Err(e) = parse_duration(timeout)
    {
        problems.push(format!("spec.options.timeout: {}", e));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ManagerError::Invalid(problems.join("; ")))
    }
}
