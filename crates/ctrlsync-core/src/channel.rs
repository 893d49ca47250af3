//! Channel Communication Types
//!
//! Message vocabulary between the session core, the runtime that drives it and
//! the presentation layer that watches it:
//! - `SessionEvent`: runtime/transport → session
//! - `Effect`: session → runtime (IO to perform)
//! - `AppEvent`: session → presentation
//! - `RuntimeCommand`: presentation → runtime

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::{ChangeSet, StatePath};
use crate::config::{ChannelConfig, Endpoint};
use crate::errors::{CtrlsyncError, ProtocolError};
use crate::protocol::Command;
use crate::types::Epoch;

// ----------------------------------------------------------------------------
// SessionEvent: Runtime → Session
// ----------------------------------------------------------------------------

/// Inputs to `SessionManager::handle`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Manual connect request
    Connect,
    /// The reconnect delay elapsed
    ReconnectDue,
    /// Transport for `epoch` finished its handshake
    TransportOpened { epoch: Epoch },
    /// Text frame received on the transport for `epoch`
    TransportMessage { epoch: Epoch, payload: String },
    /// Transport for `epoch` closed, errored or failed to open
    TransportClosed { epoch: Epoch, reason: String },
    /// Liveness interval fired for `epoch`
    LivenessTick { epoch: Epoch },
    /// Drop the connection and reconnect after the delay
    Reset,
    /// Stop everything
    Shutdown,
    /// Outbound command from presentation
    SendCommand(Command),
}

impl SessionEvent {
    /// Short name for logs and audit entries
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connect => "Connect",
            SessionEvent::ReconnectDue => "ReconnectDue",
            SessionEvent::TransportOpened { .. } => "TransportOpened",
            SessionEvent::TransportMessage { .. } => "TransportMessage",
            SessionEvent::TransportClosed { .. } => "TransportClosed",
            SessionEvent::LivenessTick { .. } => "LivenessTick",
            SessionEvent::Reset => "Reset",
            SessionEvent::Shutdown => "Shutdown",
            SessionEvent::SendCommand(_) => "SendCommand",
        }
    }

    /// Epoch the event belongs to, for transport and timer events
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            SessionEvent::TransportOpened { epoch }
            | SessionEvent::TransportMessage { epoch, .. }
            | SessionEvent::TransportClosed { epoch, .. }
            | SessionEvent::LivenessTick { epoch } => Some(*epoch),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Effect: Session → Runtime
// ----------------------------------------------------------------------------

/// IO the runtime must perform on behalf of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a transport tagged with `epoch`
    OpenTransport { epoch: Epoch, endpoint: Endpoint },
    /// Write a text frame on the transport for `epoch`
    SendFrame { epoch: Epoch, frame: String },
    /// Close the transport for `epoch`
    CloseTransport { epoch: Epoch },
    /// Start the periodic liveness timer, replacing any previous one
    StartLivenessTimer { epoch: Epoch, interval: Duration },
    StopLivenessTimer,
    /// Arm the one-shot reconnect timer, replacing any previous one
    ScheduleReconnect { delay: Duration },
    CancelReconnect,
}

// ----------------------------------------------------------------------------
// AppEvent: Session → Presentation
// ----------------------------------------------------------------------------

/// Coarse session status for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    /// Transport open, no heartbeat acknowledged yet
    Connected,
    /// Heartbeat acknowledged at least once
    Live,
    /// Liveness failure; reconnect pending
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Live => "live",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why the session left Connecting/Connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectCause {
    /// Transport closed or failed to open
    Closed { reason: String },
    /// Heartbeat retries exhausted
    LivenessTimeout { sequence: u64, attempts: u32 },
    /// Explicit reset
    Reset,
    Shutdown,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    StatusChanged { status: SessionStatus },
    /// First heartbeat acknowledgement of the session
    SessionLive,
    Disconnected { cause: DisconnectCause },
    ProbeSent { sequence: u64, retries_left: u32 },
    /// `value` is the number carried by the ACK
    HeartbeatAcknowledged { sequence: u64, value: u64 },
    StateChanged { changes: ChangeSet },
    /// Displayed paths that no longer hold a value
    CacheCleared { stale_paths: Vec<StatePath> },
    Alert { text: String },
    CommandDropped { command: String, status: SessionStatus },
    ProtocolWarning { error: ProtocolError },
}

impl AppEvent {
    /// Events presentation can miss under backpressure without ending up with
    /// a wrong view of the session
    ///
    /// Status, disconnects, cache clears, alerts and dropped commands are
    /// never lossy.
    pub fn is_lossy(&self) -> bool {
        matches!(
            self,
            AppEvent::ProbeSent { .. }
                | AppEvent::HeartbeatAcknowledged { .. }
                | AppEvent::StateChanged { .. }
                | AppEvent::ProtocolWarning { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// RuntimeCommand: Presentation → Runtime
// ----------------------------------------------------------------------------

/// Requests from the presentation layer to the session runtime
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCommand {
    Send(Command),
    Reconnect,
    Reset,
    Shutdown,
}

impl From<RuntimeCommand> for SessionEvent {
    fn from(command: RuntimeCommand) -> Self {
        match command {
            RuntimeCommand::Send(command) => SessionEvent::SendCommand(command),
            RuntimeCommand::Reconnect => SessionEvent::Connect,
            RuntimeCommand::Reset => SessionEvent::Reset,
            RuntimeCommand::Shutdown => SessionEvent::Shutdown,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel buffer is full")]
    ChannelFull,
    #[error("Channel is closed")]
    ChannelClosed,
}

impl From<ChannelError> for CtrlsyncError {
    fn from(err: ChannelError) -> Self {
        CtrlsyncError::Channel {
            reason: err.to_string(),
        }
    }
}

pub type CommandSender = tokio::sync::mpsc::Sender<RuntimeCommand>;
pub type CommandReceiver = tokio::sync::mpsc::Receiver<RuntimeCommand>;
pub type EventSender = tokio::sync::mpsc::Sender<SessionEvent>;
pub type EventReceiver = tokio::sync::mpsc::Receiver<SessionEvent>;
pub type AppEventSender = tokio::sync::mpsc::Sender<AppEvent>;
pub type AppEventReceiver = tokio::sync::mpsc::Receiver<AppEvent>;

/// Create bounded command channel (Presentation → Runtime)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    tokio::sync::mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (Transport links → Runtime)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::channel(config.link_buffer_size)
}

/// Create bounded app event channel (Session → Presentation)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    tokio::sync::mpsc::channel(config.app_event_buffer_size)
}

/// Non-blocking send so a slow consumer never stalls the session loop
pub trait NonBlockingSend<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError>;
}

impl<T> NonBlockingSend<T> for tokio::sync::mpsc::Sender<T> {
    fn try_send_non_blocking(&self, message: T) -> Result<(), ChannelError> {
        self.try_send(message).map_err(|e| match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => ChannelError::ChannelFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => ChannelError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_command_mapping() {
        assert_eq!(SessionEvent::from(RuntimeCommand::Reconnect), SessionEvent::Connect);
        assert_eq!(SessionEvent::from(RuntimeCommand::Reset), SessionEvent::Reset);
        assert_eq!(SessionEvent::from(RuntimeCommand::Shutdown), SessionEvent::Shutdown);
    }

    #[test]
    fn test_event_epoch_extraction() {
        let epoch = Epoch::new(4);
        assert_eq!(SessionEvent::LivenessTick { epoch }.epoch(), Some(epoch));
        assert_eq!(SessionEvent::Connect.epoch(), None);
        assert_eq!(SessionEvent::Reset.name(), "Reset");
    }

    #[test]
    fn test_lossy_app_events() {
        assert!(AppEvent::ProbeSent {
            sequence: 0,
            retries_left: 2
        }
        .is_lossy());
        assert!(AppEvent::StateChanged {
            changes: ChangeSet::new()
        }
        .is_lossy());
        assert!(!AppEvent::StatusChanged {
            status: SessionStatus::Disconnected
        }
        .is_lossy());
        assert!(!AppEvent::Disconnected {
            cause: DisconnectCause::Reset
        }
        .is_lossy());
        assert!(!AppEvent::Alert {
            text: "overheat".to_string()
        }
        .is_lossy());
    }

    #[tokio::test]
    async fn test_non_blocking_send_reports_full_and_closed() {
        let config = ChannelConfig {
            app_event_buffer_size: 1,
            ..Default::default()
        };
        let (sender, receiver) = create_app_event_channel(&config);

        assert!(sender.try_send_non_blocking(AppEvent::SessionLive).is_ok());
        assert_eq!(
            sender.try_send_non_blocking(AppEvent::SessionLive),
            Err(ChannelError::ChannelFull)
        );

        drop(receiver);
        assert_eq!(
            sender.try_send_non_blocking(AppEvent::SessionLive),
            Err(ChannelError::ChannelClosed)
        );
    }
}
