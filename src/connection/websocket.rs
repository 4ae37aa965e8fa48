//! WebSocket Upgrade Server
//!
//! HTTP server of the ws2tcp relay. Owns its own router; every request is
//! treated as an upgrade to relay.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ConnectionTracker;
use crate::config::Config;
use crate::forward::{router, UpgradeState, WebSocketForwarder};
use crate::Result;

/// Serves WebSocket upgrades and relays each to the TCP target
pub struct WebSocketServer {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    forwarder: Arc<WebSocketForwarder>,
    tracker: Arc<ConnectionTracker>,
}

impl WebSocketServer {
    pub fn new(config: Arc<Config>) -> Self {
        let forwarder = Arc::new(WebSocketForwarder::from_config(&config));
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

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Router relaying upgrades whose sessions are children of `shutdown`
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        router(UpgradeState {
            forwarder: Arc::clone(&self.forwarder),
            tracker: Arc::clone(&self.tracker),
            shutdown,
        })
    }

    /// Bind the HTTP listener
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listen = self.config.listen_addr();
        let listener = TcpListener::bind(&listen)
            .await
            .with_context(|| format!("listen error: {}", listen))?;
        let local_addr = listener.local_addr()?;

        info!("listening on ws://{}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Bind (if needed) and serve until `shutdown` fires
    pub async fn start(&mut self, shutdown: CancellationToken) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        let app = self.router(shutdown.clone());
        let signal = shutdown.clone();

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
            .context("serve error")?;

        // Upgraded sockets are not tracked by axum; they end through the shutdown token
        self.tracker.wait_for_drain(self.config.server.shutdown_timeout).await;
        info!("WebSocket server stopped");
        Ok(())
    }
}
