//! Error types for the ctrlsync core
//!
//! This module contains the error taxonomy used by the session machinery:
//! transport failures, liveness timeouts, protocol desync and malformed input,
//! command construction errors, and the `CtrlsyncError` type that unifies them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures of the duplex channel itself
///
/// The cause is not distinguished by the session: every variant routes to
/// Disconnected and a scheduled reconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },
    #[error("Connection to {endpoint} timed out after {duration_ms}ms")]
    ConnectTimeout { endpoint: String, duration_ms: u64 },
    #[error("Connection closed: {reason}")]
    Closed { reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Receive failed: {reason}")]
    ReceiveFailed { reason: String },
    #[error("Liveness timeout: probe {sequence} unacknowledged after {attempts} attempts")]
    LivenessTimeout { sequence: u64, attempts: u32 },
}

/// Problems with inbound protocol traffic
///
/// None of these are fatal; the session logs them and continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String, payload: String },
    #[error("Unknown message with keys [{keys}]")]
    UnknownMessage { keys: String },
    #[error("Acknowledgement mismatch: expected sequence {expected}, got {received}")]
    SequenceMismatch { expected: u64, received: u64 },
    #[error("Unsolicited acknowledgement for sequence {received}")]
    UnsolicitedAck { received: u64 },
}

impl ProtocolError {
    /// Build a malformed-message error, truncating the payload for logs
    pub fn malformed(reason: impl Into<String>, payload: &str) -> Self {
        const MAX_PAYLOAD: usize = 256;
        let payload = if payload.len() > MAX_PAYLOAD {
            let mut end = MAX_PAYLOAD;
            while !payload.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &payload[..end])
        } else {
            payload.to_string()
        };
        ProtocolError::MalformedMessage {
            reason: reason.into(),
            payload,
        }
    }

    /// Whether this error is an acknowledgement desync rather than bad input
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::SequenceMismatch { .. } | ProtocolError::UnsolicitedAck { .. }
        )
    }
}

/// Invalid outbound command construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Variable path is empty")]
    EmptyPath,
    #[error("Variable path '{path}' contains an empty segment")]
    EmptySegment { path: String },
    #[error("Action identifier is empty")]
    EmptyAction,
    #[error("Field '{field}' is reserved")]
    ReservedField { field: String },
    #[error("Value for '{field}' is not a scalar")]
    NotScalar { field: String },
    #[error("Cannot parse '{input}' as a command value")]
    InvalidValue { input: String },
}

// ----------------------------------------------------------------------------
// Unified Error Type
// ----------------------------------------------------------------------------

/// Core error type for ctrlsync
#[derive(Debug, thiserror::Error)]
pub enum CtrlsyncError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Channel error: {reason}")]
    Channel { reason: String },
}

pub type Result<T> = core::result::Result<T, CtrlsyncError>;
