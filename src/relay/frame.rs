//! Message Frames
//!
//! The relay engine is generic over the WebSocket library that produced a
//! connection. Both libraries in use (tungstenite for dialed connections,
//! axum for accepted upgrades) expose their own message enum; [`Frame`]
//! classifies them the same way.

use std::error::Error as StdError;
use std::io;

use axum::extract::ws as axum_ws;
use tokio_tungstenite::tungstenite::{
    self,
    error::ProtocolError,
    protocol::{frame::coding::CloseCode, CloseFrame},
};

/// Close status sent when a session ends.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close status sent instead of [`NORMAL_CLOSURE`] when configured to flag failed sessions.
pub const INTERNAL_ERROR: u16 = 1011;

/// How the relay treats a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Carries relayed payload
    Binary,
    /// Answer to a heartbeat probe
    Pong,
    /// Peer started the closing handshake
    Close,
    /// Text and anything else; dropped
    Other,
}

/// A WebSocket message as seen by the relay engine.
pub trait Frame: Sized + Send + Unpin + 'static {
    fn binary(payload: Vec<u8>) -> Self;

    fn ping(payload: Vec<u8>) -> Self;

    fn close(code: u16, reason: &'static str) -> Self;

    fn kind(&self) -> FrameKind;

    fn into_payload(self) -> Vec<u8>;
}

impl Frame for tungstenite::Message {
    fn binary(payload: Vec<u8>) -> Self {
        tungstenite::Message::Binary(payload)
    }

    fn ping(payload: Vec<u8>) -> Self {
        tungstenite::Message::Ping(payload)
    }

    fn close(code: u16, reason: &'static str) -> Self {
        tungstenite::Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        }))
    }

    fn kind(&self) -> FrameKind {
        match self {
            tungstenite::Message::Binary(_) => FrameKind::Binary,
            tungstenite::Message::Pong(_) => FrameKind::Pong,
            tungstenite::Message::Close(_) => FrameKind::Close,
            _ => FrameKind::Other,
        }
    }

    fn into_payload(self) -> Vec<u8> {
        self.into_data()
    }
}

impl Frame for axum_ws::Message {
    fn binary(payload: Vec<u8>) -> Self {
        axum_ws::Message::Binary(payload)
    }

    fn ping(payload: Vec<u8>) -> Self {
        axum_ws::Message::Ping(payload)
    }

    fn close(code: u16, reason: &'static str) -> Self {
        axum_ws::Message::Close(Some(axum_ws::CloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    fn kind(&self) -> FrameKind {
        match self {
            axum_ws::Message::Binary(_) => FrameKind::Binary,
            axum_ws::Message::Pong(_) => FrameKind::Pong,
            axum_ws::Message::Close(_) => FrameKind::Close,
            _ => FrameKind::Other,
        }
    }

    fn into_payload(self) -> Vec<u8> {
        self.into_data()
    }
}

/// Returns true when a receive error only means the peer went away.
///
/// Walks the source chain so that errors wrapped by axum are classified the
/// same way as raw tungstenite errors.
pub fn is_peer_gone(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(ws_err) = err.downcast_ref::<tungstenite::Error>() {
            match ws_err {
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    return true
                }
                _ => {}
            }
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Encodes a heartbeat sequence number as a ping payload.
pub(crate) fn encode_probe(seq: u64) -> Vec<u8> {
    seq.to_be_bytes().to_vec()
}

/// Decodes a pong payload produced by [`encode_probe`].
pub(crate) fn decode_probe(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
