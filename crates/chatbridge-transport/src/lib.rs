//! Client-facing transport for the chat bridge.
//!
//! Provides:
//! - Wire protocol (JSON)
//! - REST and SSE routes
//! - WebSocket transport (feature: websocket)

pub mod api;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use api::{ApiError, AppState, router};
pub use protocol::{ClientMessage, SendAt, ServerMessage};
