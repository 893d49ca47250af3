//! CLI application tests against an in-memory controller
//!
//! The echo controller acknowledges probes, answers every SET with the matching
//! update and every action with an alert, like the firmware's web endpoint.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use ctrlsync_cli::commands::run_interactive;
use ctrlsync_cli::{CliAppConfig, CliError, CtrlsyncApp};
use ctrlsync_core::{Command, ControllerAction, Endpoint, SessionConfig, StatePath, TransportError};
use ctrlsync_runtime::{Transport, TransportLink};

// ----------------------------------------------------------------------------
// Echo Controller
// ----------------------------------------------------------------------------

struct EchoController {
    refuse: bool,
}

#[async_trait]
impl Transport for EchoController {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportLink>, TransportError> {
        if self.refuse {
            return Err(TransportError::ConnectFailed {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let (replies, inbound) = mpsc::unbounded_channel();
        Ok(Box::new(EchoLink { replies, inbound }))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

struct EchoLink {
    replies: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl EchoLink {
    fn reply_to(frame: &Value) -> Option<Value> {
        if let Some(sequence) = frame.get("PING") {
            return Some(json!({ "ACK": sequence }));
        }
        if let (Some(Value::Array(path)), Some(value)) = (frame.get("SET"), frame.get("TO")) {
            let mut nested = value.clone();
            for segment in path.iter().rev() {
                let mut level = Map::new();
                level.insert(segment.as_str()?.to_string(), nested);
                nested = Value::Object(level);
            }
            return Some(json!({ "UPD": nested }));
        }
        frame
            .get("CMD")
            .and_then(Value::as_str)
            .map(|id| json!({ "ALERT": format!("ran {}", id) }))
    }
}

#[async_trait]
impl TransportLink for EchoLink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let parsed: Value = serde_json::from_str(&frame).map_err(|e| TransportError::SendFailed {
            reason: e.to_string(),
        })?;
        if let Some(reply) = Self::reply_to(&parsed) {
            let _ = self.replies.send(reply.to_string());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn test_config(show_heartbeats: bool) -> CliAppConfig {
    let mut config = CliAppConfig {
        session: SessionConfig::testing(),
        ..Default::default()
    };
    config.cli.show_heartbeats = show_heartbeats;
    config
}

fn start(config: CliAppConfig, refuse: bool) -> (CtrlsyncApp, SharedOutput) {
    let output = SharedOutput::default();
    let app = CtrlsyncApp::start_with(
        config,
        Arc::new(EchoController { refuse }),
        Box::new(output.clone()),
    )
    .unwrap();
    (app, output)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn set_is_mirrored_back_into_the_display() {
    let (mut app, output) = start(test_config(false), false);

    app.wait_until_connected(Duration::from_secs(1)).await.unwrap();
    app.send(Command::set_dotted("ecu.idle", 900i64).unwrap())
        .await
        .unwrap();
    app.drain_for(Duration::from_millis(50)).await;

    assert_eq!(
        app.presenter()
            .displayed()
            .get(&StatePath::from_dotted("ecu.idle")),
        Some(&json!(900))
    );
    let lines = output.lines();
    assert!(lines.contains(&"connected".to_string()));
    assert!(lines.contains(&"ecu.idle = 900".to_string()));

    app.stop().await.unwrap();
    assert!(output.lines().contains(&"shutdown".to_string()));
}

#[tokio::test(start_paused = true)]
async fn actions_surface_controller_alerts() {
    let (mut app, output) = start(test_config(false), false);

    app.wait_until_connected(Duration::from_secs(1)).await.unwrap();
    app.send(
        ControllerAction::Print {
            message: "hello".to_string(),
        }
        .into(),
    )
    .await
    .unwrap();
    app.drain_for(Duration::from_millis(50)).await;

    assert!(output.lines().contains(&"ALERT: ran print".to_string()));
    app.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeats_are_printed_when_enabled() {
    let (mut app, output) = start(test_config(true), false);

    app.wait_until_connected(Duration::from_secs(1)).await.unwrap();
    app.drain_for(Duration::from_millis(250)).await;

    let lines = output.lines();
    assert!(lines.contains(&"ping (0)".to_string()));
    assert!(lines.contains(&"ok (0)".to_string()));
    assert!(lines.contains(&"live".to_string()));
    app.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unreachable_controller_times_out() {
    let (mut app, output) = start(test_config(false), true);

    let result = app.wait_until_connected(Duration::from_millis(200)).await;
    assert!(matches!(result, Err(CliError::Timeout(_))));
    assert!(output.lines().iter().any(|line| line == "closed"));
    app.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn interactive_input_error_still_stops_the_session() {
    let (mut app, output) = start(test_config(false), false);
    app.wait_until_connected(Duration::from_secs(1)).await.unwrap();

    // second line is not valid UTF-8
    let input: &[u8] = b"set ecu.idle 900\n\xff\xfe\n";
    let result = run_interactive(app, tokio::io::BufReader::new(input), "> ").await;

    assert!(matches!(result, Err(CliError::Io(_))));
    assert!(output.lines().contains(&"shutdown".to_string()));
}

#[tokio::test(start_paused = true)]
async fn interactive_quit_stops_the_session() {
    let (mut app, output) = start(test_config(false), false);
    app.wait_until_connected(Duration::from_secs(1)).await.unwrap();

    let input: &[u8] = b"quit\n";
    run_interactive(app, tokio::io::BufReader::new(input), "> ")
        .await
        .unwrap();

    assert!(output.lines().contains(&"shutdown".to_string()));
}
