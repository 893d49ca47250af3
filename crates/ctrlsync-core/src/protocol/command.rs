//! Outbound commands: variable sets and named controller actions
//!
//! Commands are validated when built, so anything that reaches the session is
//! already encodable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::cache::StatePath;
use crate::errors::CommandError;
use crate::protocol::wire::{ClientMessage, KEY_CMD};

// ----------------------------------------------------------------------------
// Scalar Values
// ----------------------------------------------------------------------------

/// A value that can be written to a controller variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Parse user input: `true`/`false`, `null`, integers, finite floats,
    /// quoted or bare text
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let trimmed = input.trim();
        match trimmed {
            "true" => return Ok(ScalarValue::Bool(true)),
            "false" => return Ok(ScalarValue::Bool(false)),
            "null" => return Ok(ScalarValue::Null),
            _ => {}
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Ok(ScalarValue::Int(int));
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if float.is_finite() {
                return Ok(ScalarValue::Float(float));
            }
            return Err(CommandError::InvalidValue {
                input: input.to_string(),
            });
        }
        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            return serde_json::from_str::<String>(trimmed)
                .map(ScalarValue::Text)
                .map_err(|_| CommandError::InvalidValue {
                    input: input.to_string(),
                });
        }
        Ok(ScalarValue::Text(trimmed.to_string()))
    }

    /// Convert a JSON value, rejecting arrays and objects
    pub fn from_json(field: &str, value: Value) -> Result<Self, CommandError> {
        match value {
            Value::Null => Ok(ScalarValue::Null),
            Value::Bool(b) => Ok(ScalarValue::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(int) => Ok(ScalarValue::Int(int)),
                None => n.as_f64().map(ScalarValue::Float).ok_or_else(|| {
                    CommandError::InvalidValue {
                        input: n.to_string(),
                    }
                }),
            },
            Value::String(s) => Ok(ScalarValue::Text(s)),
            Value::Array(_) | Value::Object(_) => Err(CommandError::NotScalar {
                field: field.to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Null => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            ScalarValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// A validated outbound command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write a scalar to a controller variable
    Set { path: StatePath, value: ScalarValue },
    /// Invoke a named controller action
    Action {
        id: String,
        extra: Map<String, Value>,
        reset_after_send: bool,
    },
}

impl Command {
    pub fn set(path: StatePath, value: impl Into<ScalarValue>) -> Result<Self, CommandError> {
        if path.is_root() {
            return Err(CommandError::EmptyPath);
        }
        if path.segments().iter().any(|segment| segment.is_empty()) {
            return Err(CommandError::EmptySegment {
                path: path.to_string(),
            });
        }
        Ok(Command::Set {
            path,
            value: value.into(),
        })
    }

    /// Variable set addressed by a dotted path
    pub fn set_dotted(path: &str, value: impl Into<ScalarValue>) -> Result<Self, CommandError> {
        Self::set(StatePath::from_dotted(path), value)
    }

    pub fn action(id: impl Into<String>) -> Result<Self, CommandError> {
        Self::action_with(id, Map::new())
    }

    /// Named action with extra scalar fields
    pub fn action_with(id: impl Into<String>, extra: Map<String, Value>) -> Result<Self, CommandError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CommandError::EmptyAction);
        }
        for (field, value) in &extra {
            if field == KEY_CMD {
                return Err(CommandError::ReservedField {
                    field: field.clone(),
                });
            }
            if value.is_array() || value.is_object() {
                return Err(CommandError::NotScalar {
                    field: field.clone(),
                });
            }
        }
        Ok(Command::Action {
            id,
            extra,
            reset_after_send: false,
        })
    }

    /// Ask the session to reset once this command has been sent
    ///
    /// Has no effect on variable sets.
    pub fn with_reset(mut self) -> Self {
        if let Command::Action {
            reset_after_send, ..
        } = &mut self
        {
            *reset_after_send = true;
        }
        self
    }

    pub fn resets_session(&self) -> bool {
        matches!(
            self,
            Command::Action {
                reset_after_send: true,
                ..
            }
        )
    }

    pub fn to_message(&self) -> ClientMessage {
        match self {
            Command::Set { path, value } => ClientMessage::Set {
                path: path.segments().to_vec(),
                value: value.to_json(),
            },
            Command::Action { id, extra, .. } => ClientMessage::Action {
                id: id.clone(),
                extra: extra.clone(),
            },
        }
    }

    /// Short description for logs and drop notices
    pub fn describe(&self) -> String {
        match self {
            Command::Set { path, value } => format!("set {} = {}", path, value.to_json()),
            Command::Action { id, .. } => format!("action {id}"),
        }
    }
}

// ----------------------------------------------------------------------------
// Known Controller Actions
// ----------------------------------------------------------------------------

/// Actions understood by the controller firmware
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerAction {
    Reboot,
    DeepSleep,
    /// Leave the web UI for the serial console
    Console,
    Ifconfig,
    NetList,
    NetAdd { ssid: String, password: String },
    NetRemove { ssid: String },
    /// Stay-on time in seconds
    NetTime { seconds: u64 },
    Print { message: String },
}

impl ControllerAction {
    pub fn id(&self) -> &'static str {
        match self {
            ControllerAction::Reboot => "reboot",
            ControllerAction::DeepSleep => "deepsleep",
            ControllerAction::Console => "console",
            ControllerAction::Ifconfig => "ifconfig",
            ControllerAction::NetList => "netls",
            ControllerAction::NetAdd { .. } => "netadd",
            ControllerAction::NetRemove { .. } => "netrm",
            ControllerAction::NetTime { .. } => "nettime",
            ControllerAction::Print { .. } => "print",
        }
    }

    /// Whether the controller drops the connection after this action
    pub fn resets_session(&self) -> bool {
        matches!(
            self,
            ControllerAction::Reboot | ControllerAction::DeepSleep | ControllerAction::Console
        )
    }

    fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        match self {
            ControllerAction::NetAdd { ssid, password } => {
                extra.insert("ID".to_string(), Value::String(ssid.clone()));
                extra.insert("PW".to_string(), Value::String(password.clone()));
            }
            ControllerAction::NetRemove { ssid } => {
                extra.insert("ID".to_string(), Value::String(ssid.clone()));
            }
            ControllerAction::NetTime { seconds } => {
                extra.insert("VAL".to_string(), Value::from(*seconds));
            }
            ControllerAction::Print { message } => {
                extra.insert("MSG".to_string(), Value::String(message.clone()));
            }
            _ => {}
        }
        extra
    }
}

impl From<ControllerAction> for Command {
    fn from(action: ControllerAction) -> Self {
        Command::Action {
            id: action.id().to_string(),
            extra: action.extra(),
            reset_after_send: action.resets_session(),
        }
    }
}
