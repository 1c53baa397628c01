//! Transport layer for messenger clients.
//!
//! Provides:
//! - Command protocol (tagged JSON)
//! - Bridge from protocol commands to a `Messenger`
//! - WebSocket transport (feature: websocket)

pub mod bridge;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use bridge::{ChannelEvents, handle_command};
pub use protocol::{ClientMessage, ErrorKind, ServerMessage};
