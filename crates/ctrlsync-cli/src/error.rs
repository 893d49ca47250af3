//! Error handling for the ctrlsync CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Session error: {0}")]
    Core(#[from] ctrlsync_core::CtrlsyncError),

    #[error("Invalid command: {0}")]
    Command(#[from] ctrlsync_core::CommandError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unrecognized input: {0}")]
    Input(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML rendering error: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
