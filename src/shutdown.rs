//! Graceful Shutdown Handling
//!
//! This module provides utilities for handling graceful shutdown of the relay servers.
//! It supports SIGTERM and SIGINT signals; every relay session derives its
//! cancellation from the coordinator's root token.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Root token; cancelled once shutdown begins
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown without waiting for a signal
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then cancel the root token.
    ///
    /// Also returns (without a signal) if shutdown was triggered elsewhere.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("interrupted");
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        #[cfg(windows)]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("interrupted");
                }
                _ = self.token.cancelled() => return Ok(()),
            }
        }

        self.token.cancel();
        Ok(())
    }
}
