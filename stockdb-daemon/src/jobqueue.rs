//! Job admission and delivery.
//!
//! Producers see an [`InputJobQueue`], consumers an [`OutputJobQueue`].
//! Admission policies are decorators that implement `InputJobQueue` and wrap
//! another one, so they stack freely:
//!
//! ```ignore
//! let base = Arc::new(UnifiedJobQueue::new(64));
//! let limited = RateLimitedInputJobQueue::per_second(base.clone(), rate, burst);
//! ```

mod rate_limited;
mod unified;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;
use crate::jobs::Job;

pub use rate_limited::RateLimitedInputJobQueue;
pub use unified::UnifiedJobQueue;

pub type Result<T> = std::result::Result<T, QueueError>;

#[async_trait]
pub trait InputJobQueue: Send + Sync {
    /// Enqueue `job`, waiting for room if needed.
    ///
    /// Fails with [`QueueError::Cancelled`] if `token` is cancelled before the
    /// job is admitted, and immediately if it already is.
    async fn add(&self, token: &CancellationToken, job: Job) -> Result<()>;
}

pub trait OutputJobQueue: Send + Sync {
    /// The consumer side. Every call returns the same shared handle.
    fn output(&self) -> Result<JobReceiver>;
}

pub trait FullJobQueue: InputJobQueue + OutputJobQueue {}

impl<T: InputJobQueue + OutputJobQueue> FullJobQueue for T {}

/// Shared consumer handle over a queue's mailbox.
///
/// Clones read from the same mailbox and compete for jobs: each job is
/// delivered to exactly one reader.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    pub(crate) fn new(receiver: mpsc::Receiver<Job>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Wait for the next job. `None` once every sender is gone and the mailbox is empty.
    pub async fn recv(&self) -> Option<Job> {
        self.inner.lock().await.recv().await
    }

    /// Take a job if one is ready and no other reader is busy with the mailbox
    pub fn try_recv(&self) -> Option<Job> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }

    /// Whether both handles read from the same mailbox
    pub fn same_channel(&self, other: &JobReceiver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests;
