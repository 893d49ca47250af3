//! Centralized Configuration Management
//!
//! Session tunables (endpoint, heartbeat cadence, retry bound, reconnect delay)
//! and channel buffer sizes, with validation.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CtrlsyncError;

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// Address of the controller's message endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "192.168.0.1".to_string(), // controller access point address
            port: 80,
            path: "/".to_string(),
        }
    }
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// WebSocket URL for this endpoint
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ----------------------------------------------------------------------------
// Protocol Options
// ----------------------------------------------------------------------------

/// Key used for outbound liveness probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeKeyword {
    #[default]
    Ping,
    Syn,
}

impl ProbeKeyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKeyword::Ping => "PING",
            ProbeKeyword::Syn => "SYN",
        }
    }
}

/// How heartbeat acknowledgements are matched to the outstanding probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMatching {
    /// The ACK number must equal the outstanding probe sequence
    #[default]
    Strict,
    /// Any ACK acknowledges the outstanding probe; the number is reported as
    /// the controller's remaining stay-on time in seconds
    Lenient,
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for the session and liveness protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Controller endpoint
    pub endpoint: Endpoint,
    /// Interval between liveness ticks
    pub ping_interval_ms: u64,
    /// Probes sent for one sequence before the session is declared dead
    pub max_unacked_probes: u32,
    /// Delay before reconnecting after a close or liveness failure
    pub reconnect_delay_ms: u64,
    /// Upper bound on a single connection attempt
    pub connect_timeout_ms: u64,
    /// Probe message key
    pub probe_keyword: ProbeKeyword,
    /// Acknowledgement matching mode
    pub ack_matching: AckMatching,
    /// Only accept commands once the first heartbeat has been acknowledged
    pub require_live_for_commands: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            ping_interval_ms: 3_500, // keeps the controller's 14s inactivity timer fed
            max_unacked_probes: 3,
            reconnect_delay_ms: 2_000,
            connect_timeout_ms: 10_000,
            probe_keyword: ProbeKeyword::default(),
            ack_matching: AckMatching::default(),
            require_live_for_commands: false,
        }
    }
}

impl SessionConfig {
    /// Create configuration for fast, deterministic tests
    pub fn testing() -> Self {
        Self {
            endpoint: Endpoint::new("127.0.0.1", 8080),
            ping_interval_ms: 100,
            max_unacked_probes: 3,
            reconnect_delay_ms: 50,
            connect_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), CtrlsyncError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(CtrlsyncError::Configuration {
                reason: "endpoint host must not be empty".to_string(),
            });
        }
        if self.endpoint.port == 0 {
            return Err(CtrlsyncError::Configuration {
                reason: "endpoint port must be greater than 0".to_string(),
            });
        }
        if self.ping_interval_ms == 0 {
            return Err(CtrlsyncError::Configuration {
                reason: "ping interval must be greater than 0".to_string(),
            });
        }
        if self.max_unacked_probes == 0 {
            return Err(CtrlsyncError::Configuration {
                reason: "max unacknowledged probes must be at least 1".to_string(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(CtrlsyncError::Configuration {
                reason: "connect timeout must be greater than 0".to_string(),
            });
        }
        if self.reconnect_delay_ms == 0 {
            return Err(CtrlsyncError::Configuration {
                reason: "reconnect delay must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the runtime's channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Runtime commands (presentation → session)
    pub command_buffer_size: usize,
    /// App events (session → presentation)
    pub app_event_buffer_size: usize,
    /// Transport link events and outbound frames
    pub link_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            app_event_buffer_size: 128, // update bursts fan out into several events
            link_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), CtrlsyncError> {
        if self.command_buffer_size == 0
            || self.app_event_buffer_size == 0
            || self.link_buffer_size == 0
        {
            return Err(CtrlsyncError::Configuration {
                reason: "channel buffer sizes must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_controller_firmware() {
        let config = SessionConfig::default();
        assert_eq!(config.endpoint.url(), "ws://192.168.0.1:80/");
        assert_eq!(config.ping_interval(), Duration::from_millis(3_500));
        assert_eq!(config.max_unacked_probes, 3);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = SessionConfig::default();
        config.max_unacked_probes = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.ping_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.endpoint.host = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.reconnect_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut channels = ChannelConfig::default();
        channels.link_buffer_size = 0;
        assert!(channels.validate().is_err());
    }

    #[test]
    fn test_endpoint_path_normalization() {
        let mut endpoint = Endpoint::new("ecu.local", 8080);
        endpoint.path = "ws".to_string();
        assert_eq!(endpoint.url(), "ws://ecu.local:8080/ws");
        assert_eq!(endpoint.to_string(), "ecu.local:8080");
    }

    #[test]
    fn test_enum_serialization() {
        let json = serde_json::to_string(&ProbeKeyword::Syn).unwrap();
        assert_eq!(json, "\"SYN\"");
        let matching: AckMatching = serde_json::from_str("\"lenient\"").unwrap();
        assert_eq!(matching, AckMatching::Lenient);
    }
}
