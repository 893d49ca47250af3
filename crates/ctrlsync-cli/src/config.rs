//! ctrlsync CLI Configuration Management
//!
//! Layered loading with figment, lowest priority first:
//! defaults, `ctrlsync.toml`, `~/.ctrlsync/config.toml`, an explicit `--config`
//! file, `CTRLSYNC_*` environment variables, command-line flags.
//!
//! Environment keys use `__` between sections, e.g.
//! `CTRLSYNC_SESSION__PING_INTERVAL_MS=1000`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use ctrlsync_core::{ChannelConfig, Endpoint, SessionConfig};

const LOCAL_CONFIG_FILE: &str = "ctrlsync.toml";
const ENV_PREFIX: &str = "CTRLSYNC_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the ctrlsync CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliAppConfig {
    /// Controller endpoint and session tunables
    pub session: SessionConfig,

    /// Runtime channel buffer sizes
    pub channels: ChannelConfig,

    /// Presentation settings
    pub cli: CliConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Prompt printed in interactive mode
    pub prompt: String,

    /// Print every probe and acknowledgement, not only failures
    pub show_heartbeats: bool,

    /// How long one-shot commands wait for the controller to accept a connection
    pub startup_timeout_secs: u64,

    /// How long one-shot commands keep listening after sending
    pub linger_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            prompt: "ctrlsync> ".to_string(),
            show_heartbeats: false,
            startup_timeout_secs: 15,
            linger_ms: 750,
        }
    }
}

impl CliConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub verbose: Option<bool>,
    pub show_heartbeats: Option<bool>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl CliAppConfig {
    /// Load configuration from files and environment only
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(CliOverrides::default())
    }

    /// Load configuration with command-line overrides applied last
    pub fn load_with_overrides(overrides: CliOverrides) -> Result<Self, ConfigError> {
        if let Some(path) = &overrides.config_file {
            if !path.exists() {
                return Err(ConfigError::FileSystem(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
        }

        let mut figment = Self::figment(overrides.config_file.as_deref());

        if let Some(host) = overrides.host {
            figment = figment.merge(("session.endpoint.host", host));
        }
        if let Some(port) = overrides.port {
            figment = figment.merge(("session.endpoint.port", port));
        }
        if let Some(verbose) = overrides.verbose {
            figment = figment.merge(("cli.verbose", verbose));
        }
        if let Some(show) = overrides.show_heartbeats {
            figment = figment.merge(("cli.show_heartbeats", show));
        }

        let config: CliAppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(explicit_file: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(user_file) = Self::default_config_path() {
            figment = figment.merge(Toml::file(user_file));
        }
        if let Some(path) = explicit_file {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// `~/.ctrlsync/config.toml`, when a home directory is known
    pub fn default_config_path() -> Option<PathBuf> {
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .ok()
            .map(|home| PathBuf::from(home).join(".ctrlsync").join("config.toml"))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        self.channels
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.cli.startup_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Startup timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = CliAppConfig {
            session: SessionConfig {
                endpoint: Endpoint::new("192.168.4.1", 80),
                ..SessionConfig::default()
            },
            cli: CliConfig {
                show_heartbeats: true,
                ..CliConfig::default()
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlsync_core::{AckMatching, ProbeKeyword};
    use figment::Jail;

    fn isolate_home(jail: &mut Jail) {
        let home = jail.directory().join("home");
        jail.set_env("HOME", home.display());
    }

    #[test]
    fn test_default_config_creation() {
        let config = CliAppConfig::default();
        assert!(!config.cli.verbose);
        assert_eq!(config.cli.prompt, "ctrlsync> ");
        assert_eq!(config.session.endpoint.url(), "ws://192.168.0.1:80/");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = CliAppConfig::default();
        config.cli.startup_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = CliAppConfig::default();
        config.session.ping_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = CliAppConfig::default();
        config.channels.command_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layering_file_env_and_flags() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            jail.create_file(
                "ctrlsync.toml",
                r#"
                [session]
                ping_interval_ms = 1000
                probe_keyword = "SYN"

                [session.endpoint]
                host = "10.0.0.7"
                port = 8080
                path = "/"
                "#,
            )?;
            jail.set_env("CTRLSYNC_SESSION__MAX_UNACKED_PROBES", "5");
            jail.set_env("CTRLSYNC_SESSION__ACK_MATCHING", "lenient");

            let config = CliAppConfig::load_with_overrides(CliOverrides {
                port: Some(81),
                verbose: Some(true),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;

            assert_eq!(config.session.ping_interval_ms, 1000);
            assert_eq!(config.session.probe_keyword, ProbeKeyword::Syn);
            assert_eq!(config.session.endpoint.host, "10.0.0.7");
            assert_eq!(config.session.endpoint.port, 81);
            assert_eq!(config.session.max_unacked_probes, 5);
            assert_eq!(config.session.ack_matching, AckMatching::Lenient);
            assert_eq!(config.session.reconnect_delay_ms, 2000);
            assert!(config.cli.verbose);
            Ok(())
        });
    }

    #[test]
    fn test_user_file_overrides_local_file() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            jail.create_file("ctrlsync.toml", "[cli]\nprompt = \"local> \"\nlinger_ms = 10\n")?;
            std::fs::create_dir_all(jail.directory().join("home/.ctrlsync"))
                .map_err(|e| e.to_string())?;
            jail.create_file("home/.ctrlsync/config.toml", "[cli]\nprompt = \"user> \"\n")?;

            let config = CliAppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.cli.prompt, "user> ");
            assert_eq!(config.cli.linger_ms, 10);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_layer_is_rejected() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            jail.set_env("CTRLSYNC_SESSION__PING_INTERVAL_MS", "0");

            let result = CliAppConfig::load();
            assert!(matches!(result, Err(ConfigError::Validation(_))));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            let result = CliAppConfig::load_with_overrides(CliOverrides {
                config_file: Some(PathBuf::from("nope.toml")),
                ..Default::default()
            });
            assert!(matches!(result, Err(ConfigError::FileSystem(_))));
            Ok(())
        });
    }

    #[test]
    fn test_rendered_config_reloads_as_explicit_file() {
        Jail::expect_with(|jail| {
            let mut config = CliAppConfig::default();
            config.session.endpoint.host = "controller.local".to_string();
            config.cli.linger_ms = 5;

            jail.create_file("rendered.toml", &config.to_toml().map_err(|e| e.to_string())?)?;
            let loaded = CliAppConfig::load_with_overrides(CliOverrides {
                config_file: Some(PathBuf::from("rendered.toml")),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;
            assert_eq!(loaded, config);
            Ok(())
        });
    }

    #[test]
    fn test_example_config_generation() {
        let example = CliAppConfig::example_config();
        assert!(example.contains("[session]"));
        assert!(example.contains("[session.endpoint]"));
        assert!(example.contains("[channels]"));
        assert!(example.contains("[cli]"));
        assert!(example.contains("probe_keyword = \"PING\""));
    }
}
