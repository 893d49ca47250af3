//! Controller wire protocol
//!
//! - `wire`: JSON message shapes and frame decoding
//! - `command`: validated outbound commands

pub mod command;
pub mod wire;

pub use command::{Command, ControllerAction, ScalarValue};
pub use wire::{decode_frame, ClientMessage, ServerMessage};
