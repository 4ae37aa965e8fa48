//! TCP-Originated Sessions
//!
//! An accepted TCP connection is relayed to a freshly dialed WebSocket.
//! No heartbeat runs on this side.

use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{close_websocket, ClosePolicy};
use crate::config::Config;
use crate::relay::{ConnectionStats, RelayEngine, RelaySession};
use crate::Result;

type DialedWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relays TCP connections to a WebSocket server
#[derive(Debug, Clone)]
pub struct TcpForwarder {
    url: String,
    engine: RelayEngine,
    dial_timeout: Duration,
    close: ClosePolicy,
}

impl TcpForwarder {
    /// Create a forwarder for `url` with default settings
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(&Config {
            server: crate::config::ServerConfig {
                target: url.into(),
                ..Default::default()
            },
            ..Config::default()
        })
    }

    /// Create a forwarder from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.server.target.clone(),
            engine: RelayEngine::from_config(&config.relay, false),
            dial_timeout: config.server.dial_timeout,
            close: ClosePolicy::from_config(&config.relay),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Relay `tcp` to the configured WebSocket URL until either side finishes.
    ///
    /// Dial failures are returned without relaying; a transport error during
    /// the relay is reported in the returned stats. Both connections are
    /// closed when this returns.
    #[instrument(skip_all, fields(peer = tracing::field::Empty))]
    pub async fn handle(&self, cancel: &CancellationToken, tcp: TcpStream) -> Result<ConnectionStats> {
        let peer = tcp
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        tracing::Span::current().record("peer", peer.as_str());
        let mut tcp = tcp;

        let mut ws = self.dial(cancel).await?;
        info!("Connected to {} for {}", self.url, peer);

        let session = RelaySession::new(peer, self.url.clone());
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

    async fn dial(&self, cancel: &CancellationToken) -> Result<DialedWebSocket> {
        debug!("Dialing {}", self.url);

        let dial = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("websocket dial to {} cancelled", self.url)),
            dial = tokio::time::timeout(self.dial_timeout, connect_async(self.url.as_str())) => dial,
        };

        let (ws, _response) = dial
            .map_err(|_| anyhow!("websocket dial to {} timed out after {:?}", self.url, self.dial_timeout))?
            .with_context(|| format!("websocket dial error: {}", self.url))?;

        Ok(ws)
    }
}
