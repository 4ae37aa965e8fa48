//! Connection Management Module
//! 
//! Accepts the "near" connections of both relay directions.

pub mod manager;
pub mod tracker;
pub mod websocket;

pub use manager::ConnectionManager;
pub use tracker::{ConnectionSlot, ConnectionTracker, TrackerStats};
pub use websocket::WebSocketServer;
