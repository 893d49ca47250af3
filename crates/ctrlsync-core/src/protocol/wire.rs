//! JSON wire messages exchanged with the controller

use serde_json::{Map, Value};
use tracing::trace;

use crate::config::ProbeKeyword;
use crate::errors::ProtocolError;

// ----------------------------------------------------------------------------
// Wire Keys
// ----------------------------------------------------------------------------

pub const KEY_ACK: &str = "ACK";
pub const KEY_UPD: &str = "UPD";
pub const KEY_UPDATE: &str = "UPDATE";
pub const KEY_ALERT: &str = "ALERT";
pub const KEY_SET: &str = "SET";
pub const KEY_TO: &str = "TO";
pub const KEY_CMD: &str = "CMD";

// ----------------------------------------------------------------------------
// Server → Client
// ----------------------------------------------------------------------------

/// A decoded message from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Heartbeat acknowledgement
    Ack(u64),
    /// Partial state document
    Update(Map<String, Value>),
    /// Text for the user
    Alert(String),
}

impl ServerMessage {
    /// Classify one JSON object; `raw` is only used for diagnostics
    ///
    /// When several known keys are present, ACK wins over UPD/UPDATE, which
    /// wins over ALERT.
    pub fn from_value(value: Value, raw: &str) -> Result<Self, ProtocolError> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::malformed("message is not a JSON object", raw));
        };

        if let Some(ack) = object.remove(KEY_ACK) {
            return ack
                .as_u64()
                .map(ServerMessage::Ack)
                .ok_or_else(|| ProtocolError::malformed("ACK is not an unsigned integer", raw));
        }

        if let Some(update) = object.remove(KEY_UPD).or_else(|| object.remove(KEY_UPDATE)) {
            return match update {
                Value::Object(tree) => Ok(ServerMessage::Update(tree)),
                _ => Err(ProtocolError::malformed("update body is not an object", raw)),
            };
        }

        if let Some(alert) = object.remove(KEY_ALERT) {
            return match alert {
                Value::String(text) => Ok(ServerMessage::Alert(text)),
                _ => Err(ProtocolError::malformed("ALERT is not a string", raw)),
            };
        }

        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        Err(ProtocolError::UnknownMessage {
            keys: keys.join(", "),
        })
    }
}

/// Decode every JSON object carried by one transport frame, in order
///
/// The controller may coalesce several objects into one frame
/// (`{"UPD":...}{"ACK":...}`). Decoding stops at the first syntax error since
/// the stream cannot be resynchronized past it.
pub fn decode_frame(payload: &str) -> Vec<Result<ServerMessage, ProtocolError>> {
    let mut messages = Vec::new();
    let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<Value>();

    loop {
        match stream.next() {
            Some(Ok(value)) => messages.push(ServerMessage::from_value(value, payload)),
            Some(Err(err)) => {
                messages.push(Err(ProtocolError::malformed(err.to_string(), payload)));
                break;
            }
            None => break,
        }
    }

    if messages.is_empty() {
        messages.push(Err(ProtocolError::malformed("empty frame", payload)));
    }
    trace!("Decoded {} message(s) from frame", messages.len());
    messages
}

// ----------------------------------------------------------------------------
// Client → Server
// ----------------------------------------------------------------------------

/// A message to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Liveness probe `{"PING": seq}`
    Probe { keyword: ProbeKeyword, sequence: u64 },
    /// Variable set `{"SET": [segments], "TO": value}`
    Set { path: Vec<String>, value: Value },
    /// Named action `{"CMD": id, ...extra}`
    Action { id: String, extra: Map<String, Value> },
}

impl ClientMessage {
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        match self {
            ClientMessage::Probe { keyword, sequence } => {
                object.insert(keyword.as_str().to_string(), Value::from(*sequence));
            }
            ClientMessage::Set { path, value } => {
                let segments = path.iter().cloned().map(Value::String).collect();
                object.insert(KEY_SET.to_string(), Value::Array(segments));
                object.insert(KEY_TO.to_string(), value.clone());
            }
            ClientMessage::Action { id, extra } => {
                for (key, value) in extra {
                    object.insert(key.clone(), value.clone());
                }
                object.insert(KEY_CMD.to_string(), Value::String(id.clone()));
            }
        }
        Value::Object(object)
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }
}
