//! Polling helpers for conditions that settle asynchronously

use std::time::Duration;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum WaitError {
    Timeout(Duration),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout(after) => write!(f, "Condition not met within {:?}", after),
        }
    }
}

impl std::error::Error for WaitError {}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_until(
    timeout: Duration,
    mut check: impl FnMut() -> bool,
) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(WaitError::Timeout(timeout));
        }
        sleep(POLL_INTERVAL).await;
    }
}
