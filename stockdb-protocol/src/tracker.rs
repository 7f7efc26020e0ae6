//! Bookkeeping for live control-socket connections.
//!
//! Every accepted connection is registered with [`ConnectionTracker::track`]
//! and holds the returned [`ConnectionGuard`] for as long as it is being
//! served. Dropping the guard deregisters the connection. Shutdown uses
//! [`ConnectionTracker::wait_for_completion`] as a bounded drain barrier.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::errors::TrackerError;

/// Metadata kept for one live connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub remote_addr: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    total: AtomicU64,
    completed: AtomicU64,
    next_id: AtomicU64,
    records: Mutex<HashMap<u64, ConnectionRecord>>,
    idle: Notify,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new connection.
    ///
    /// The connection stays active until the returned guard is dropped.
    pub fn track(self: &Arc<Self>, remote_addr: impl Into<String>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = ConnectionRecord {
            id,
            started_at: Utc::now(),
            remote_addr: remote_addr.into(),
            attributes: HashMap::new(),
        };

        self.records.lock().insert(id, record);
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;

        info!(connection_id = id, active, total, "Connection tracked");

        ConnectionGuard {
            id,
            tracker: Arc::clone(self),
        }
    }

    /// Attach a key/value attribute to a live connection. No-op once it is gone.
    pub fn set_attribute(&self, id: u64, key: impl Into<String>, value: impl Into<String>) {
        if let Some(record) = self.records.lock().get_mut(&id) {
            record.attributes.insert(key.into(), value.into());
        }
    }

    /// Snapshot of the live connections, ordered by id
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self.records.lock().values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Wait until no connection is active, or fail once `timeout` elapses.
    ///
    /// The error carries the number of connections still active at the
    /// moment the timeout fired.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<(), TrackerError> {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                // Register interest before checking so a release in between is not lost
                notified.as_mut().enable();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => Ok(()),
            Err(_) => Err(TrackerError::DrainTimeout {
                remaining: self.active_count(),
                timeout,
            }),
        }
    }

    /// Log the drain and wait for it, see [`Self::wait_for_completion`].
    pub async fn drain(&self, timeout: Duration) -> Result<(), TrackerError> {
        info!("Draining {} active connections", self.active_count());
        self.wait_for_completion(timeout).await
    }

    fn release(&self, id: u64) {
        // Only a connection that is still registered may decrement the counters
        if self.records.lock().remove(&id).is_none() {
            return;
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        debug!(connection_id = id, active = previous - 1, "Connection released");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Keeps a connection registered with its [`ConnectionTracker`].
#[must_use = "the connection is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    tracker: Arc<ConnectionTracker>,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.tracker.set_attribute(self.id, key, value);
    }

    /// Release the connection now rather than at end of scope.
    pub fn finish(self) {}
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release(self.id);
    }
}
