//! wsrelay Library
//! 
//! Bidirectional relay between TCP connections and WebSocket connections.
//! 
//! `tcp2ws` accepts TCP connections and relays each to a WebSocket server;
//! `ws2tcp` accepts WebSocket upgrades and relays each to a TCP server. Both
//! share the same [`relay::RelayEngine`].

pub mod cli;
pub mod config;
pub mod connection;
pub mod forward;
pub mod logging;
pub mod relay;
pub mod shutdown;

pub use config::{Config, RelayMode};
pub use connection::{ConnectionManager, WebSocketServer};
pub use relay::{RelayEngine, RelayError};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
