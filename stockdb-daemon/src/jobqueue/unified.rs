use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{InputJobQueue, JobReceiver, OutputJobQueue, Result};
use crate::errors::QueueError;
use crate::jobs::Job;

/// Bounded mailbox queue. Backpressure comes from the channel capacity alone.
#[derive(Debug)]
pub struct UnifiedJobQueue {
    sender: mpsc::Sender<Job>,
    receiver: JobReceiver,
    capacity: usize,
}

impl UnifiedJobQueue {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: JobReceiver::new(receiver),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently waiting in the mailbox
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InputJobQueue for UnifiedJobQueue {
    async fn add(&self, token: &CancellationToken, job: Job) -> Result<()> {
        if token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let job_id = job.id().to_string();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(job_id, "Enqueue cancelled while waiting for capacity");
                Err(QueueError::Cancelled)
            }
            sent = self.sender.send(job) => {
                sent.map_err(|_| QueueError::Closed)?;
                debug!(job_id, queued = self.len(), "Job enqueued");
                Ok(())
            }
        }
    }
}

impl OutputJobQueue for UnifiedJobQueue {
    fn output(&self) -> Result<JobReceiver> {
        Ok(self.receiver.clone())
    }
}
