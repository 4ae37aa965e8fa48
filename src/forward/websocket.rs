//! WebSocket-Originated Sessions
//!
//! An accepted WebSocket upgrade is relayed to a freshly dialed TCP
//! connection. The heartbeat runs on this side so that idle sessions behind
//! proxies and load balancers are noticed when they silently die.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{close_websocket, ClosePolicy};
use crate::config::{normalize_dial_addr, Config};
use crate::connection::ConnectionTracker;
use crate::relay::frame::NORMAL_CLOSURE;
use crate::relay::{ConnectionStats, RelayEngine, RelaySession};
use crate::Result;

/// Relays WebSocket connections to a TCP server
#[derive(Debug, Clone)]
pub struct WebSocketForwarder {
    tcp_addr: String,
    engine: RelayEngine,
    dial_timeout: Duration,
    close: ClosePolicy,
}

impl WebSocketForwarder {
    /// Create a forwarder for `tcp_addr` with default settings
    pub fn new(tcp_addr: impl Into<String>) -> Self {
        Self::from_config(&Config {
            server: crate::config::ServerConfig {
                target: tcp_addr.into(),
                ..Default::default()
            },
            ..Config::default()
        })
    }

    /// Create a forwarder from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            tcp_addr: normalize_dial_addr(&config.server.target),
            engine: RelayEngine::from_config(&config.relay, true),
            dial_timeout: config.server.dial_timeout,
            close: ClosePolicy::from_config(&config.relay),
        }
    }

    pub fn tcp_addr(&self) -> &str {
        &self.tcp_addr
    }

    /// Relay an upgraded WebSocket to the configured TCP address.
    ///
    /// The WebSocket is closed on every path, including a failed dial. A
    /// transport error during the relay is reported in the returned stats.
    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        mut ws: WebSocket,
        peer: &str,
    ) -> Result<ConnectionStats> {
        let mut tcp = match self.dial(cancel).await {
            Ok(tcp) => tcp,
            Err(e) => {
                close_websocket(&mut ws, NORMAL_CLOSURE, self.close.timeout).await;
                return Err(e);
            }
        };
        info!("Connected to {} for {}", self.tcp_addr, peer);

        // errors are labelled with the TCP side in both directions
        let label = tcp
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.tcp_addr.clone());
        let session = RelaySession::new(label, peer.to_string());
        let outcome = self.engine.run(cancel, &mut ws, &mut tcp, &session).await;

        close_websocket(&mut ws, self.close.status(&outcome), self.close.timeout).await;
        drop(tcp);

        session.log_stats();
        let error = outcome.err().map(|e| {
            warn!(session_id = %session.session_id, "{}", e);
            e.to_string()
        });
        Ok(session.to_stats(error))
    }

    async fn dial(&self, cancel: &CancellationToken) -> Result<TcpStream> {
        debug!("Dialing {}", self.tcp_addr);

        let dial = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("tcp dial to {} cancelled", self.tcp_addr)),
            dial = tokio::time::timeout(self.dial_timeout, TcpStream::connect(self.tcp_addr.as_str())) => dial,
        };

        dial.map_err(|_| anyhow!("tcp connect to {} timed out after {:?}", self.tcp_addr, self.dial_timeout))?
            .with_context(|| format!("tcp connect error: {}", self.tcp_addr))
    }
}

/// Shared state of the upgrade route
#[derive(Debug, Clone)]
pub struct UpgradeState {
    pub forwarder: Arc<WebSocketForwarder>,
    pub tracker: Arc<ConnectionTracker>,
    /// Parent of every session's cancellation token
    pub shutdown: CancellationToken,
}

/// Build the router that relays every upgrade, whatever its path
pub fn router(state: UpgradeState) -> Router {
    Router::new().fallback(ws_handler).with_state(state)
}

/// Accept a WebSocket upgrade and relay it to the TCP target.
///
/// Requests that cannot be upgraded get `500 websocket accept error`.
pub async fn ws_handler(
    State(state): State<UpgradeState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            error!("websocket accept error: {}", rejection);
            return (StatusCode::INTERNAL_SERVER_ERROR, "websocket accept error").into_response();
        }
    };

    let slot = match state.tracker.try_acquire() {
        Ok(slot) => slot,
        Err(e) => {
            warn!("Rejecting WebSocket upgrade: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
        }
    };

    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("Handling WebSocket connection from {}", peer);

    upgrade
        .on_failed_upgrade(|e| warn!("websocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let cancel = state.shutdown.child_token();
            match state.forwarder.handle(&cancel, socket, &peer).await {
                Ok(stats) => debug!(
                    session_id = %stats.session_id,
                    total_bytes = stats.total_bytes,
                    "WebSocket session from {} finished", peer
                ),
                Err(e) => error!("WebSocket session from {} failed: {:#}", peer, e),
            }
        })
}
