//! Data Relay Module
//! 
//! Handles bidirectional data relay between a TCP stream and a WebSocket.

pub mod engine;
pub mod error;
pub mod frame;
pub mod session;

pub use engine::{Heartbeat, RelayEngine, RelayOptions, DEFAULT_CHUNK_SIZE};
pub use error::{RelayError, RelayOp};
pub use frame::{Frame, FrameKind};
pub use session::{ConnectionStats, RelaySession};
