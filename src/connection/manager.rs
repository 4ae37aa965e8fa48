//! TCP Connection Manager
//!
//! Accept loop of the tcp2ws relay: every accepted connection is handed to
//! a [`TcpForwarder`] on its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ConnectionTracker;
use crate::config::Config;
use crate::forward::TcpForwarder;
use crate::Result;

/// Accepts TCP connections and relays each to the WebSocket target
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    forwarder: Arc<TcpForwarder>,
    tracker: Arc<ConnectionTracker>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let forwarder = Arc::new(TcpForwarder::from_config(&config));
        let tracker = Arc::new(ConnectionTracker::new(config.server.max_connections));

        Self {
            listener: None,
            config,
            forwarder,
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Address the listener is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Bind the TCP listener
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listen = self.config.listen_addr();
        info!("Binding TCP listener to {}", listen);

        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("listen error: {}", listen))?;
        let local_addr = listener.local_addr()?;

        info!("listening on {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Bind (if needed) and accept connections until `shutdown` fires
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections(&shutdown).await?;

        // Dropping the listener stops new connections; sessions see the same token
        self.listener = None;
        self.tracker.wait_for_drain(self.config.server.shutdown_timeout).await;
        Ok(())
    }

    async fn accept_connections(&self, shutdown: &CancellationToken) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        info!("Starting connection acceptance loop");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Transient (e.g. out of file descriptors); keep serving
                    error!("accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let slot = match self.tracker.try_acquire() {
                Ok(slot) => slot,
                Err(e) => {
                    warn!("Rejecting connection from {}: {}", addr, e);
                    continue;
                }
            };

            info!("handling connection from {}", addr);
            let forwarder = Arc::clone(&self.forwarder);
            let cancel = shutdown.child_token();

            tokio::spawn(async move {
                let _slot = slot;
                match forwarder.handle(&cancel, stream).await {
                    Ok(stats) => debug!(
                        session_id = %stats.session_id,
                        total_bytes = stats.total_bytes,
                        "Connection from {} finished", addr
                    ),
                    Err(e) => error!("handle error: {:#}", e),
                }
            });
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }
}
