//! Relay Errors

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// The pump operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOp {
    WebSocketRead,
    TcpWrite,
    TcpRead,
    WebSocketWrite,
}

impl fmt::Display for RelayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            RelayOp::WebSocketRead => "websocket read",
            RelayOp::TcpWrite => "tcp write",
            RelayOp::TcpRead => "tcp read",
            RelayOp::WebSocketWrite => "websocket write",
        };
        f.write_str(op)
    }
}

/// A transport failure that ended a relay session
#[derive(Debug, thiserror::Error)]
#[error("conn {peer}: {op} error: {source}")]
pub struct RelayError {
    op: RelayOp,
    peer: String,
    source: Box<dyn StdError + Send + Sync>,
}

impl RelayError {
    pub fn new(
        op: RelayOp,
        peer: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            op,
            peer: peer.into(),
            source: source.into(),
        }
    }

    /// Operation that failed
    pub fn op(&self) -> RelayOp {
        self.op
    }

    /// Remote address label of the TCP side
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Single-slot error record shared by the pumps of one session.
///
/// The first error recorded wins; later ones are dropped.
#[derive(Debug, Default)]
pub(crate) struct FirstError {
    slot: Mutex<Option<RelayError>>,
}

impl FirstError {
    pub(crate) fn record(&self, err: RelayError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match *slot {
            None => *slot = Some(err),
            Some(_) => debug!("Dropping secondary relay error: {}", err),
        }
    }

    pub(crate) fn into_inner(self) -> Option<RelayError> {
        self.slot.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
