//! ctrlsync CLI library
//!
//! Configuration, input parsing and terminal presentation for the `ctrlsync`
//! binary, kept in a library so the pieces can be tested without a controller.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod presenter;

pub use app::CtrlsyncApp;
pub use cli::{Cli, Commands};
pub use config::{CliAppConfig, CliOverrides, ConfigError};
pub use error::{CliError, Result};
pub use presenter::Presenter;
