use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{InputJobQueue, Result};
use crate::errors::QueueError;
use crate::jobs::Job;

/// Paces admission into another queue with a token bucket.
pub struct RateLimitedInputJobQueue {
    inner: Arc<dyn InputJobQueue>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateLimitedInputJobQueue {
    pub fn new(inner: Arc<dyn InputJobQueue>, limiter: DefaultDirectRateLimiter) -> Self {
        Self {
            inner,
            limiter: Arc::new(limiter),
        }
    }

    /// Allow `rate` admissions per second with bursts of up to `burst`
    pub fn per_second(inner: Arc<dyn InputJobQueue>, rate: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self::new(inner, RateLimiter::direct(quota))
    }
}

#[async_trait]
impl InputJobQueue for RateLimitedInputJobQueue {
    async fn add(&self, token: &CancellationToken, job: Job) -> Result<()> {
        if token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(job_id = job.id(), "Cancelled while waiting for a rate limit token");
                return Err(QueueError::Cancelled);
            }
            _ = self.limiter.until_ready() => {}
        }

        self.inner.add(token, job).await
    }
}
