//! Turns session app events into terminal lines
//!
//! The presenter keeps its own mirror of every displayed value, the way the
//! controller's web page keeps one element per variable.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use ctrlsync_core::{AckMatching, AppEvent, DisconnectCause, SessionStatus, StatePath};

/// Text shown for a vanished or cleared value
const EMPTY_VALUE: &str = "-";

pub struct Presenter {
    displayed: BTreeMap<StatePath, Value>,
    show_heartbeats: bool,
    ack_carries_stay_on: bool,
    status: SessionStatus,
}

impl Presenter {
    pub fn new(show_heartbeats: bool, ack_matching: AckMatching) -> Self {
        Self {
            displayed: BTreeMap::new(),
            show_heartbeats,
            ack_carries_stay_on: ack_matching == AckMatching::Lenient,
            status: SessionStatus::Disconnected,
        }
    }

    /// Last status seen
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn displayed(&self) -> &BTreeMap<StatePath, Value> {
        &self.displayed
    }

    /// Update the mirror and return the lines to print, in order
    pub fn apply(&mut self, event: &AppEvent) -> Vec<String> {
        match event {
            AppEvent::StatusChanged { status } => {
                self.status = *status;
                match status {
                    SessionStatus::Connecting => vec!["connecting".to_string()],
                    SessionStatus::Connected => vec!["connected".to_string()],
                    SessionStatus::Live => vec!["live".to_string()],
                    // The disconnect cause carries the detail
                    SessionStatus::Disconnected | SessionStatus::Failed => Vec::new(),
                }
            }
            AppEvent::SessionLive => Vec::new(),
            AppEvent::Disconnected { cause } => vec![disconnect_text(cause)],
            AppEvent::ProbeSent { sequence, .. } => {
                self.heartbeat_line(format!("ping ({})", sequence))
            }
            AppEvent::HeartbeatAcknowledged { sequence, value } => {
                let line = if self.ack_carries_stay_on {
                    format!("ok ({}) stay-on {}", sequence, format_hms(*value))
                } else {
                    format!("ok ({})", sequence)
                };
                self.heartbeat_line(line)
            }
            AppEvent::StateChanged { changes } => changes
                .iter()
                .map(|(path, value)| match value {
                    Some(value) => {
                        self.displayed.insert(path.clone(), value.clone());
                        format!("{} = {}", path, render_value(value))
                    }
                    None => {
                        self.displayed.remove(path);
                        format!("{} = {}", path, EMPTY_VALUE)
                    }
                })
                .collect(),
            AppEvent::CacheCleared { stale_paths } => {
                for path in stale_paths {
                    self.displayed.remove(path);
                }
                if stale_paths.is_empty() {
                    Vec::new()
                } else {
                    vec![format!("state cleared ({} values)", stale_paths.len())]
                }
            }
            AppEvent::Alert { text } => vec![format!("ALERT: {}", text)],
            AppEvent::CommandDropped { command, status } => {
                vec![format!("not sent while {}: {}", status, command)]
            }
            AppEvent::ProtocolWarning { error } => vec![format!("warning: {}", error)],
        }
    }

    fn heartbeat_line(&self, line: String) -> Vec<String> {
        if self.show_heartbeats {
            vec![line]
        } else {
            Vec::new()
        }
    }

    /// Displayed values as one nested JSON document
    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        let mut root = Map::new();
        for (path, value) in &self.displayed {
            insert_nested(&mut root, path.segments(), value.clone());
        }
        serde_json::to_string_pretty(&Value::Object(root))
    }
}

fn disconnect_text(cause: &DisconnectCause) -> String {
    match cause {
        DisconnectCause::Closed { .. } => "closed".to_string(),
        DisconnectCause::LivenessTimeout { sequence, .. } => format!("timeout ({})", sequence),
        DisconnectCause::Reset => "reset".to_string(),
        DisconnectCause::Shutdown => "shutdown".to_string(),
    }
}

/// Strings print bare, everything else as JSON
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn insert_nested(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_nested(child, rest, value);
            }
        }
    }
}

/// Seconds as `HH:MM:SS`; hours keep growing past 99
pub fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlsync_core::{ProtocolError, StateCache};
    use serde_json::json;

    fn changes(update: Value) -> AppEvent {
        let mut cache = StateCache::new();
        let Value::Object(map) = update else {
            panic!("update must be an object");
        };
        AppEvent::StateChanged {
            changes: cache.merge_update(map),
        }
    }

    #[test]
    fn test_status_texts() {
        let mut presenter = Presenter::new(true, AckMatching::Strict);

        assert_eq!(
            presenter.apply(&AppEvent::StatusChanged {
                status: SessionStatus::Connected
            }),
            vec!["connected"]
        );
        assert_eq!(presenter.status(), SessionStatus::Connected);
        assert_eq!(
            presenter.apply(&AppEvent::ProbeSent {
                sequence: 4,
                retries_left: 2
            }),
            vec!["ping (4)"]
        );
        assert_eq!(
            presenter.apply(&AppEvent::HeartbeatAcknowledged {
                sequence: 4,
                value: 4
            }),
            vec!["ok (4)"]
        );
        assert_eq!(
            presenter.apply(&AppEvent::Disconnected {
                cause: DisconnectCause::LivenessTimeout {
                    sequence: 5,
                    attempts: 3
                }
            }),
            vec!["timeout (5)"]
        );
        assert_eq!(
            presenter.apply(&AppEvent::Disconnected {
                cause: DisconnectCause::Closed {
                    reason: "eof".to_string()
                }
            }),
            vec!["closed"]
        );
        assert_eq!(
            presenter.apply(&AppEvent::Disconnected {
                cause: DisconnectCause::Reset
            }),
            vec!["reset"]
        );
        assert!(presenter
            .apply(&AppEvent::StatusChanged {
                status: SessionStatus::Failed
            })
            .is_empty());
    }

    #[test]
    fn test_heartbeats_hidden_by_default() {
        let mut presenter = Presenter::new(false, AckMatching::Strict);
        assert!(presenter
            .apply(&AppEvent::ProbeSent {
                sequence: 0,
                retries_left: 2
            })
            .is_empty());
        assert!(presenter
            .apply(&AppEvent::HeartbeatAcknowledged {
                sequence: 0,
                value: 0
            })
            .is_empty());
    }

    #[test]
    fn test_lenient_ack_shows_stay_on_time() {
        let mut presenter = Presenter::new(true, AckMatching::Lenient);
        assert_eq!(
            presenter.apply(&AppEvent::HeartbeatAcknowledged {
                sequence: 2,
                value: 3725
            }),
            vec!["ok (2) stay-on 01:02:05"]
        );
    }

    #[test]
    fn test_state_changes_update_mirror() {
        let mut presenter = Presenter::new(false, AckMatching::Strict);

        let lines = presenter.apply(&changes(json!({
            "ecu": {"idle": 850, "mode": "eco"},
            "ok": true
        })));
        assert_eq!(lines, vec!["ecu.idle = 850", "ecu.mode = eco", "ok = true"]);
        assert_eq!(
            presenter.displayed().get(&StatePath::from_dotted("ecu.mode")),
            Some(&json!("eco"))
        );

        let snapshot: Value = serde_json::from_str(&presenter.snapshot_json().unwrap()).unwrap();
        assert_eq!(snapshot, json!({"ecu": {"idle": 850, "mode": "eco"}, "ok": true}));

        let lines = presenter.apply(&AppEvent::CacheCleared {
            stale_paths: vec![
                StatePath::from_dotted("ecu.idle"),
                StatePath::from_dotted("ecu.mode"),
                StatePath::from_dotted("ok"),
            ],
        });
        assert_eq!(lines, vec!["state cleared (3 values)"]);
        assert!(presenter.displayed().is_empty());
    }

    #[test]
    fn test_alerts_and_warnings() {
        let mut presenter = Presenter::new(false, AckMatching::Strict);
        assert_eq!(
            presenter.apply(&AppEvent::Alert {
                text: "low voltage".to_string()
            }),
            vec!["ALERT: low voltage"]
        );
        assert_eq!(
            presenter.apply(&AppEvent::CommandDropped {
                command: "action reboot".to_string(),
                status: SessionStatus::Connecting
            }),
            vec!["not sent while connecting: action reboot"]
        );
        let lines = presenter.apply(&AppEvent::ProtocolWarning {
            error: ProtocolError::UnsolicitedAck { received: 9 },
        });
        assert_eq!(lines, vec!["warning: Unsolicited acknowledgement for sequence 9"]);
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(3600), "01:00:00");
        assert_eq!(format_hms(360_000), "100:00:00");
    }
}
