//! Session Forwarders
//!
//! Each forwarder receives the "near" connection produced by an acceptor,
//! dials the "far" connection, relays between the two, and releases both.

pub mod tcp;
pub mod websocket;

pub use tcp::TcpForwarder;
pub use websocket::{router, ws_handler, UpgradeState, WebSocketForwarder};

use std::fmt::Display;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tracing::debug;

use crate::config::RelayConfig;
use crate::relay::frame::{Frame, INTERNAL_ERROR, NORMAL_CLOSURE};
use crate::relay::RelayError;

/// How the WebSocket leg is closed once a relay finishes
#[derive(Debug, Clone, Copy)]
pub struct ClosePolicy {
    pub timeout: Duration,
    pub error_status: bool,
}

impl ClosePolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            timeout: config.close_timeout,
            error_status: config.close_with_error_status,
        }
    }

    /// Close status for a relay outcome
    pub fn status(&self, outcome: &Result<(), RelayError>) -> u16 {
        if self.error_status && outcome.is_err() {
            INTERNAL_ERROR
        } else {
            NORMAL_CLOSURE
        }
    }
}

impl Default for ClosePolicy {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Send a close frame with `code` and flush, giving up after `timeout`.
///
/// Errors are expected here (the peer may already be gone) and only logged.
pub(crate) async fn close_websocket<W, M>(ws: &mut W, code: u16, timeout: Duration)
where
    W: Sink<M> + Unpin,
    W::Error: Display,
    M: Frame,
{
    let closing = async {
        if let Err(e) = ws.send(M::close(code, "")).await {
            debug!("WebSocket close frame not sent: {}", e);
        }
        ws.close().await
    };

    match tokio::time::timeout(timeout, closing).await {
        Ok(Ok(())) => debug!("WebSocket closed with status {}", code),
        Ok(Err(e)) => debug!("WebSocket close error: {}", e),
        Err(_) => debug!("WebSocket close timed out after {:?}", timeout),
    }
}
