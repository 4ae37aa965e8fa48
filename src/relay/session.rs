//! Relay Session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};
use uuid::Uuid;

/// One paired TCP connection and WebSocket connection being relayed
#[derive(Debug)]
pub struct RelaySession {
    pub session_id: String,
    /// Remote address of the TCP side, used to label errors
    pub peer: String,
    /// WebSocket side: the dialed URL, or the address of the upgrading client
    pub ws_peer: String,
    pub start_time: Instant,
    /// TCP -> WebSocket
    pub bytes_up: AtomicU64,
    /// WebSocket -> TCP
    pub bytes_down: AtomicU64,
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub session_id: String,
    pub peer: String,
    pub ws_peer: String,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub total_bytes: u64,
    /// Transport error that ended the relay, if any
    pub error: Option<String>,
}

impl RelaySession {
    /// Create a new relay session
    pub fn new(peer: impl Into<String>, ws_peer: impl Into<String>) -> Self {
        let session_id = format!("relay_{}", Uuid::new_v4().simple());
        let peer = peer.into();
        let ws_peer = ws_peer.into();
        debug!("Creating new relay session: {} ({} <-> {})", session_id, peer, ws_peer);

        Self {
            session_id,
            peer,
            ws_peer,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Generate connection statistics
    pub fn to_stats(&self, error: Option<String>) -> ConnectionStats {
        let duration = self.duration();

        ConnectionStats {
            session_id: self.session_id.clone(),
            peer: self.peer.clone(),
            ws_peer: self.ws_peer.clone(),
            start_time: SystemTime::now() - duration,
            duration_ms: duration.as_millis() as u64,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            total_bytes: self.total_bytes(),
            error,
        }
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            peer = %self.peer,
            ws_peer = %self.ws_peer,
            duration = %humantime::format_duration(self.duration()),
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            total_bytes = self.total_bytes(),
            "Relay session completed"
        );
    }
}
