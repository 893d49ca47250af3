//! Session Runtime
//!
//! Drives a `SessionManager` from a single `tokio::select!` loop over runtime
//! commands, transport link events, the liveness interval and the reconnect
//! delay. Every input becomes a `SessionEvent`; every resulting `Effect` is
//! executed here. The manager is only ever touched from this loop.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, trace, warn};

use ctrlsync_core::{
    create_app_event_channel, create_command_channel, create_event_channel, AppEventReceiver,
    AppEvent, AppEventSender, ChannelConfig, Command, CommandReceiver, CommandSender,
    CtrlsyncError, Effect, Endpoint, Epoch, EventReceiver, EventSender, NonBlockingSend,
    Result, RuntimeCommand, SessionConfig, SessionEvent, SessionManager, TransportError,
};

use crate::transport::{Transport, TransportLink};

// ----------------------------------------------------------------------------
// Link Task
// ----------------------------------------------------------------------------

/// Instructions from the loop to a link task
#[derive(Debug)]
enum LinkCommand {
    Send(String),
    Close,
}

/// The loop's handle on the link task for one epoch
struct LinkHandle {
    epoch: Epoch,
    outbound: mpsc::Sender<LinkCommand>,
    task: JoinHandle<()>,
}

/// Open, pump and close one transport link
///
/// Every exit path reports `TransportClosed` so the session can settle, unless
/// the loop is gone.
async fn run_link(
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    connect_timeout: Duration,
    epoch: Epoch,
    mut outbound: mpsc::Receiver<LinkCommand>,
    events: EventSender,
) {
    let opened = tokio::select! {
        result = tokio::time::timeout(connect_timeout, transport.open(&endpoint)) => result,
        _ = outbound.recv() => {
            debug!("Transport {} superseded before it opened", epoch);
            return;
        }
    };

    let mut link: Box<dyn TransportLink> = match opened {
        Ok(Ok(link)) => link,
        Ok(Err(err)) => {
            report_closed(&events, epoch, err).await;
            return;
        }
        Err(_) => {
            let err = TransportError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                duration_ms: connect_timeout.as_millis() as u64,
            };
            report_closed(&events, epoch, err).await;
            return;
        }
    };

    debug!("Transport {} open via {}", epoch, transport.name());
    if events.send(SessionEvent::TransportOpened { epoch }).await.is_err() {
        let _ = link.close().await;
        return;
    }

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(LinkCommand::Send(frame)) => {
                    trace!("Transport {} -> {}", epoch, frame);
                    if let Err(err) = link.send(frame).await {
                        let _ = link.close().await;
                        report_closed(&events, epoch, err).await;
                        return;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    if let Err(err) = link.close().await {
                        debug!("Transport {} close: {}", epoch, err);
                    }
                    let err = TransportError::Closed { reason: "closed by client".to_string() };
                    report_closed(&events, epoch, err).await;
                    return;
                }
            },
            inbound = link.recv() => match inbound {
                Some(Ok(payload)) => {
                    let event = SessionEvent::TransportMessage { epoch, payload };
                    if events.send(event).await.is_err() {
                        let _ = link.close().await;
                        return;
                    }
                }
                Some(Err(err)) => {
                    report_closed(&events, epoch, err).await;
                    return;
                }
                None => {
                    let err = TransportError::Closed { reason: "closed by controller".to_string() };
                    report_closed(&events, epoch, err).await;
                    return;
                }
            },
        }
    }
}

async fn report_closed(events: &EventSender, epoch: Epoch, err: TransportError) {
    let _ = events
        .send(SessionEvent::TransportClosed {
            epoch,
            reason: err.to_string(),
        })
        .await;
}

// ----------------------------------------------------------------------------
// Timers
// ----------------------------------------------------------------------------

struct LivenessTimer {
    epoch: Epoch,
    interval: Interval,
}

async fn next_tick(timer: &mut Option<LivenessTimer>) -> Epoch {
    match timer {
        Some(timer) => {
            timer.interval.tick().await;
            timer.epoch
        }
        None => std::future::pending().await,
    }
}

async fn reconnect_due(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

// ----------------------------------------------------------------------------
// App Event Outbox
// ----------------------------------------------------------------------------

/// How long shutdown waits for presentation to take the backlog
const BACKLOG_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// App events on their way to presentation
///
/// Lossy events are dropped when the channel is full. Everything else waits in
/// the backlog, in order, until presentation catches up.
struct AppEventOutbox {
    sender: AppEventSender,
    backlog: VecDeque<AppEvent>,
}

impl AppEventOutbox {
    fn new(sender: AppEventSender) -> Self {
        Self {
            sender,
            backlog: VecDeque::new(),
        }
    }

    fn publish(&mut self, event: AppEvent) {
        let event = if self.backlog.is_empty() {
            match self.sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(event)) => event,
                Err(TrySendError::Closed(_)) => {
                    trace!("No app event consumer");
                    return;
                }
            }
        } else {
            event
        };

        if event.is_lossy() {
            debug!("App event channel full, dropping {:?}", event);
        } else {
            if self.backlog.is_empty() {
                warn!("Presentation is lagging, holding app events");
            }
            self.backlog.push_back(event);
        }
    }

    /// Hand the backlog over before the loop exits
    async fn flush(&mut self) {
        let flush = async {
            while let Some(event) = self.backlog.pop_front() {
                if self.sender.send(event).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(BACKLOG_FLUSH_TIMEOUT, flush).await.is_err() {
            warn!("Presentation did not take {} pending events", self.backlog.len());
        }
    }
}

// ----------------------------------------------------------------------------
// Session Runtime
// ----------------------------------------------------------------------------

/// Owns the session, its single transport link and both timers
pub struct SessionRuntime {
    manager: SessionManager,
    transport: Arc<dyn Transport>,
    channels: ChannelConfig,
    link: Option<LinkHandle>,
    liveness: Option<LivenessTimer>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl SessionRuntime {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_channel_config(config, ChannelConfig::default(), transport)
    }

    pub fn with_channel_config(
        config: SessionConfig,
        channels: ChannelConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        channels.validate()?;
        Ok(Self {
            manager: SessionManager::new(config)?,
            transport,
            channels,
            link: None,
            liveness: None,
            reconnect: None,
        })
    }

    /// Spawn the session loop and connect
    pub fn start(self) -> RuntimeHandle {
        let (command_sender, command_receiver) = create_command_channel(&self.channels);
        let (app_event_sender, app_event_receiver) = create_app_event_channel(&self.channels);
        let (event_sender, event_receiver) = create_event_channel(&self.channels);

        let task = tokio::spawn(self.run(command_receiver, event_sender, event_receiver, app_event_sender));

        RuntimeHandle {
            command_sender,
            app_event_receiver: Some(app_event_receiver),
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        mut commands: CommandReceiver,
        events_tx: EventSender,
        mut events: EventReceiver,
        app_events: AppEventSender,
    ) -> Result<()> {
        info!("Session runtime starting ({})", self.transport.name());
        let mut outbox = AppEventOutbox::new(app_events);
        self.dispatch(SessionEvent::Connect, &events_tx, &mut outbox);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RuntimeCommand::Shutdown) | None => {
                        self.dispatch(SessionEvent::Shutdown, &events_tx, &mut outbox);
                        break;
                    }
                    Some(command) => self.dispatch(command.into(), &events_tx, &mut outbox),
                },
                Some(event) = events.recv() => {
                    if event.epoch() != Some(self.manager.epoch()) {
                        trace!("Dropping {} from superseded transport", event.name());
                        continue;
                    }
                    self.dispatch(event, &events_tx, &mut outbox);
                }
                epoch = next_tick(&mut self.liveness) => {
                    self.dispatch(SessionEvent::LivenessTick { epoch }, &events_tx, &mut outbox);
                }
                _ = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.dispatch(SessionEvent::ReconnectDue, &events_tx, &mut outbox);
                }
                permit = outbox.sender.clone().reserve_owned(), if !outbox.backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(event) = outbox.backlog.pop_front() {
                            permit.send(event);
                        }
                    }
                    Err(_) => outbox.backlog.clear(),
                },
            }
        }

        outbox.flush().await;
        info!("Session runtime stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: SessionEvent, events_tx: &EventSender, outbox: &mut AppEventOutbox) {
        let transition = self.manager.handle(event);

        for effect in transition.effects {
            self.execute(effect, events_tx);
        }

        for app_event in transition.app_events {
            outbox.publish(app_event);
        }
    }

    fn execute(&mut self, effect: Effect, events_tx: &EventSender) {
        match effect {
            Effect::OpenTransport { epoch, endpoint } => {
                if let Some(stale) = self.link.take() {
                    warn!("Opening {} while {} still held, aborting it", epoch, stale.epoch);
                    stale.task.abort();
                }
                let (outbound, outbound_rx) = mpsc::channel(self.channels.link_buffer_size);
                let task = tokio::spawn(run_link(
                    self.transport.clone(),
                    endpoint,
                    self.manager.config().connect_timeout(),
                    epoch,
                    outbound_rx,
                    events_tx.clone(),
                ));
                self.link = Some(LinkHandle {
                    epoch,
                    outbound,
                    task,
                });
            }
            Effect::SendFrame { epoch, frame } => match &self.link {
                Some(link) if link.epoch == epoch => {
                    if let Err(err) = link.outbound.try_send_non_blocking(LinkCommand::Send(frame)) {
                        warn!("Frame for transport {} not queued: {}", epoch, err);
                    }
                }
                _ => debug!("No transport {} for outbound frame", epoch),
            },
            Effect::CloseTransport { epoch } => match self.link.take() {
                Some(link) if link.epoch == epoch => {
                    if link.outbound.try_send_non_blocking(LinkCommand::Close).is_err() {
                        link.task.abort();
                    }
                }
                other => self.link = other,
            },
            Effect::StartLivenessTimer { epoch, interval } => {
                let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.liveness = Some(LivenessTimer {
                    epoch,
                    interval: timer,
                });
            }
            Effect::StopLivenessTimer => self.liveness = None,
            Effect::ScheduleReconnect { delay } => {
                debug!("Reconnecting in {:?}", delay);
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelReconnect => self.reconnect = None,
        }
    }
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running session runtime
pub struct RuntimeHandle {
    command_sender: CommandSender,
    app_event_receiver: Option<AppEventReceiver>,
    task: Option<JoinHandle<Result<()>>>,
}

impl RuntimeHandle {
    /// Take the app event receiver (can only be called once)
    pub fn take_app_events(&mut self) -> Option<AppEventReceiver> {
        self.app_event_receiver.take()
    }

    async fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| CtrlsyncError::Channel {
                reason: "session runtime is not running".to_string(),
            })
    }

    /// Queue a command for the controller
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.send(RuntimeCommand::Send(command)).await
    }

    /// Drop the current connection attempt and connect again immediately
    pub async fn reconnect(&self) -> Result<()> {
        self.send(RuntimeCommand::Reconnect).await
    }

    /// Close the connection and reconnect after the configured delay
    pub async fn reset(&self) -> Result<()> {
        self.send(RuntimeCommand::Reset).await
    }

    /// Check if the runtime is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop timers, close the link and end the loop
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down session runtime");
        let _ = self.send(RuntimeCommand::Shutdown).await;

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(result)) => result?,
                Ok(Err(e)) => error!("Session runtime task failed: {}", e),
                Err(_) => warn!("Session runtime did not stop in time"),
            }
        }
        Ok(())
    }
}
