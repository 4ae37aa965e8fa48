//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which side of the relay accepts connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Accept TCP, dial a WebSocket URL
    #[default]
    Tcp2Ws,
    /// Accept WebSocket upgrades, dial a TCP address
    Ws2Tcp,
}

impl RelayMode {
    /// Listen address used when none is configured
    pub fn default_listen(&self) -> &'static str {
        match self {
            RelayMode::Tcp2Ws => ":7101",
            RelayMode::Ws2Tcp => ":8080",
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip)]
    pub mode: RelayMode,
    pub server: ServerConfig,
    pub relay: RelayConfig,
}

/// Listener and dial target configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` or `:port`; falls back to the mode's default
    pub listen: Option<String>,
    /// WebSocket URL for tcp2ws, `address:port` for ws2tcp
    pub target: String,
    pub max_connections: usize,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Relay engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub chunk_size: usize,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
    /// Close with 1011 instead of 1000 when the relay ended with an error
    pub close_with_error_status: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            target: String::new(),
            max_connections: 1000,
            dial_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::relay::DEFAULT_CHUNK_SIZE,
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_millis(4800),
            close_timeout: Duration::from_secs(5),
            close_with_error_status: false,
        }
    }
}

impl Config {
    /// Default configuration for the given mode
    pub fn for_mode(mode: RelayMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Effective listen address, with Go-style `:port` expanded to all interfaces
    pub fn listen_addr(&self) -> String {
        let listen = self
            .server
            .listen
            .as_deref()
            .unwrap_or_else(|| self.mode.default_listen());
        normalize_listen_addr(listen)
    }
}

/// Expand `:port` to `127.0.0.1:port`, the local system, for dialing
pub fn normalize_dial_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("127.0.0.1{}", addr)
    } else {
        addr.to_string()
    }
}

/// Expand `:port` to `0.0.0.0:port`
pub fn normalize_listen_addr(listen: &str) -> String {
    if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    }
}
