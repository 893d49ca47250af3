//! ctrlsync application: one runtime, one presenter, one output sink

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use ctrlsync_core::{AppEvent, AppEventReceiver, Command, CtrlsyncError, SessionStatus};
use ctrlsync_runtime::{RuntimeHandle, SessionRuntime, Transport, WebSocketTransport};

use crate::config::CliAppConfig;
use crate::error::{CliError, Result};
use crate::presenter::Presenter;

/// Running client session with its presentation state
pub struct CtrlsyncApp {
    handle: RuntimeHandle,
    events: AppEventReceiver,
    presenter: Presenter,
    output: Box<dyn Write + Send>,
}

impl CtrlsyncApp {
    /// Connect to the configured controller over WebSocket
    pub fn start(config: CliAppConfig) -> Result<Self> {
        Self::start_with(config, Arc::new(WebSocketTransport::new()), Box::new(std::io::stdout()))
    }

    /// Start on any transport, printing to `output`
    pub fn start_with(
        config: CliAppConfig,
        transport: Arc<dyn Transport>,
        output: Box<dyn Write + Send>,
    ) -> Result<Self> {
        info!(
            "Starting session with {} via {}",
            config.session.endpoint,
            transport.name()
        );
        let presenter = Presenter::new(config.cli.show_heartbeats, config.session.ack_matching);
        let runtime = SessionRuntime::with_channel_config(config.session, config.channels, transport)?;

        let mut handle = runtime.start();
        let events = handle.take_app_events().ok_or_else(|| CtrlsyncError::Channel {
            reason: "app event receiver already taken".to_string(),
        })?;

        Ok(Self {
            handle,
            events,
            presenter,
            output,
        })
    }

    /// Wait for one app event and print it; `false` once the runtime is gone
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.show(&event);
                true
            }
            None => false,
        }
    }

    fn show(&mut self, event: &AppEvent) {
        debug!("App event: {:?}", event);
        for line in self.presenter.apply(event) {
            let _ = writeln!(self.output, "{}", line);
        }
        let _ = self.output.flush();
    }

    pub fn status(&self) -> SessionStatus {
        self.presenter.status()
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Print events until the transport is open or `timeout` passes
    pub async fn wait_until_connected(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !matches!(self.status(), SessionStatus::Connected | SessionStatus::Live) {
            match tokio::time::timeout_at(deadline, self.next_event()).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(CtrlsyncError::Channel {
                        reason: "session runtime stopped".to_string(),
                    }
                    .into());
                }
                Err(_) => {
                    return Err(CliError::Timeout(format!(
                        "no connection within {}s",
                        timeout.as_secs()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Print events for `duration`
    pub async fn drain_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while let Ok(true) = tokio::time::timeout_at(deadline, self.next_event()).await {}
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        Ok(self.handle.send_command(command).await?)
    }

    pub async fn reconnect(&self) -> Result<()> {
        Ok(self.handle.reconnect().await?)
    }

    pub async fn reset(&self) -> Result<()> {
        Ok(self.handle.reset().await?)
    }

    /// Displayed values as pretty JSON
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(self.presenter.snapshot_json()?)
    }

    /// Shut the runtime down and print the final events
    pub async fn stop(mut self) -> Result<()> {
        let mut pending = Vec::new();
        let stopped = {
            let shutdown = self.handle.shutdown();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    result = &mut shutdown => break result,
                    Some(event) = self.events.recv() => pending.push(event),
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            pending.push(event);
        }
        for event in &pending {
            self.show(event);
        }
        stopped?;
        info!("Session stopped");
        Ok(())
    }
}
