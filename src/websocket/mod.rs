//! WebSocket delivery surface
//!
//! Clients connect over a single upgrade endpoint, declare symbol
//! interests with JSON commands, and receive selected per-second
//! prices as `price_update` messages. Fan-out goes through the [`Hub`],
//! which owns the registry of live connections.

pub mod handler;
pub mod hub;
pub mod messages;

pub use handler::{websocket_handler, WsState};
pub use hub::{ClientHandle, ClientId, Hub};
pub use messages::{ClientMessage, WsMessage};
