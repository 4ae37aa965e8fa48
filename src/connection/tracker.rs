//! Connection Tracking
//!
//! Limits the number of concurrent sessions and lets shutdown wait for the
//! active ones to drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::Result;

/// Counts sessions against a fixed limit
#[derive(Debug)]
pub struct ConnectionTracker {
    max_connections: usize,
    semaphore: Arc<Semaphore>,
    total_accepted: AtomicUsize,
    total_rejected: AtomicUsize,
}

/// Snapshot of tracker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub active_connections: usize,
    pub max_connections: usize,
    pub total_accepted: usize,
    pub total_rejected: usize,
}

/// Held by a session for its whole lifetime
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        debug!("Released connection slot");
    }
}

impl ConnectionTracker {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            semaphore: Arc::new(Semaphore::new(max_connections)),
            total_accepted: AtomicUsize::new(0),
            total_rejected: AtomicUsize::new(0),
        }
    }

    /// Try to acquire a connection slot
    pub fn try_acquire(&self) -> Result<ConnectionSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.total_accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Acquired connection slot, active connections: {}",
                    self.active_connections()
                );
                Ok(ConnectionSlot { _permit: permit })
            }
            Err(_) => {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                Err(anyhow::anyhow!(
                    "Connection limit reached ({})",
                    self.max_connections
                ))
            }
        }
    }

    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            active_connections: self.active_connections(),
            max_connections: self.max_connections,
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }

    /// Wait until every slot is released or `timeout` elapses.
    ///
    /// Returns true if all sessions finished in time.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start_time = Instant::now();
        let mut last_count = self.active_connections();
        if last_count > 0 {
            info!(
                "Waiting for {} active connections to close (timeout: {:?})",
                last_count, timeout
            );
        }

        while last_count > 0 && start_time.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;

            let current_count = self.active_connections();
            if current_count != last_count {
                debug!("Active connections: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        if last_count == 0 {
            debug!("All connections closed in {:?}", start_time.elapsed());
            true
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start_time.elapsed(),
                last_count
            );
            false
        }
    }
}
