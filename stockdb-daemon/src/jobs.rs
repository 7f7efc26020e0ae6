use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockdb_protocol::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work created when a resource is accepted.
///
/// The job is held in memory only; the accepted resource itself is what the
/// store persists.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub resource: Resource,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            start_time: Utc::now(),
            end_time: None,
            status: JobStatus::Pending,
        }
    }

    /// The job id is the name of the resource it was created from
    pub fn id(&self) -> &str {
        self.resource.name()
    }

    pub fn mark_running(&mut self) {
        self.start_time = Utc::now();
        self.status = JobStatus::Running;
    }

    pub fn mark_completed(&mut self) {
        self.finish(JobStatus::Completed);
    }

    pub fn mark_failed(&mut self) {
        self.finish(JobStatus::Failed);
    }

    fn finish(&mut self, status: JobStatus) {
        self.end_time = Some(Utc::now());
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockdb_protocol::resource::{DataCollection, Metadata};

    fn job(name: &str) -> Job {
        Job::new(Resource::DataCollection(DataCollection {
            metadata: Metadata { name: name.into() },
            ..Default::default()
        }))
    }

    #[test]
    fn new_job_is_pending() {
        let job = job("aapl-daily");
        assert_eq!(job.id(), "aapl-daily");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.end_time.is_none());
    }

    #[test]
    fn status_transitions_set_end_time() {
        let mut job = job("x");
        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert!(!job.status.is_terminal());

        job.mark_failed();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_terminal());
        let end = job.end_time.unwrap();
        assert!(end >= job.start_time);

        job.mark_completed();
        assert_eq!(job.status.to_string(), "completed");
    }
}
