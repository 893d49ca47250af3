//! ctrlsync core
//!
//! Sans-IO session machinery for keeping a client mirror in sync with an
//! embedded controller over a JSON message channel: connection lifecycle,
//! heartbeat liveness, deep-merge state cache and command encoding. The
//! `ctrlsync-runtime` crate drives it with real transports and timers.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod cache;
pub mod channel;
pub mod config;
pub mod errors;
pub mod liveness;
pub mod protocol;
pub mod session;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use cache::{ChangeSet, StateCache, StatePath};
pub use channel::{
    create_app_event_channel, create_command_channel, create_event_channel, AppEvent,
    AppEventReceiver, AppEventSender, ChannelError, CommandReceiver, CommandSender,
    DisconnectCause, Effect, EventReceiver, EventSender, NonBlockingSend, RuntimeCommand,
    SessionEvent, SessionStatus,
};
pub use config::{AckMatching, ChannelConfig, Endpoint, ProbeKeyword, SessionConfig};
pub use errors::{CommandError, CtrlsyncError, ProtocolError, Result, TransportError};
pub use liveness::{AckOutcome, LivenessTracker, Probe, TickOutcome};
pub use protocol::{decode_frame, ClientMessage, Command, ControllerAction, ScalarValue, ServerMessage};
pub use session::{AuditEntry, SessionManager, SessionState, Transition};
pub use types::{Epoch, SystemTimeSource, TimeSource, Timestamp};
