//! ctrlsync runtime
//!
//! Async engine around the sans-IO `ctrlsync-core` session:
//! - `SessionRuntime`: the select loop that owns the session, timers and link
//! - `Transport` / `TransportLink`: the seam for duplex text channels
//! - `WebSocketTransport`: the production transport

mod runtime;
pub mod transport;
pub mod websocket;

pub use runtime::{RuntimeHandle, SessionRuntime};
pub use transport::{Transport, TransportLink};
pub use websocket::WebSocketTransport;

// Re-export core types for convenience
pub use ctrlsync_core::{
    AppEvent, AppEventReceiver, ChannelConfig, Command, CtrlsyncError, DisconnectCause,
    Endpoint, Result, RuntimeCommand, SessionConfig, SessionStatus, TransportError,
};
