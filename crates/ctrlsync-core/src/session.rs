//! Session State Machine
//!
//! `SessionManager` owns the connection lifecycle, the liveness tracker and the
//! state cache. It performs no IO: every input arrives as a `SessionEvent`
//! through `handle`, and every consequence leaves as a `Transition` listing the
//! effects the runtime must perform and the events presentation should see.
//!
//! Each connection attempt gets a fresh `Epoch`. Transport events and liveness
//! ticks carrying any other epoch are ignored.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

use crate::cache::StateCache;
use crate::channel::{AppEvent, DisconnectCause, Effect, SessionEvent, SessionStatus};
use crate::config::SessionConfig;
use crate::errors::{Result, TransportError};
use crate::liveness::{LivenessTracker, TickOutcome};
use crate::protocol::{decode_frame, ClientMessage, Command, ServerMessage};
use crate::types::{Epoch, SystemTimeSource, TimeSource, Timestamp};

/// Audit entries kept by the manager
pub const AUDIT_TRAIL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Session State Types
// ----------------------------------------------------------------------------

/// Connection lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No transport; a reconnect may be scheduled
    Disconnected(DisconnectedState),
    /// Transport open requested
    Connecting(ConnectingState),
    /// Transport open; liveness cycle running
    Connected(ConnectedState),
    /// Liveness failure; transport closed and reconnect scheduled
    Failed(FailedState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectedState {
    pub since: Timestamp,
    pub cause: Option<DisconnectCause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectingState {
    pub epoch: Epoch,
    pub started: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedState {
    pub epoch: Epoch,
    pub since: Timestamp,
    /// Set by the first accepted heartbeat acknowledgement
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedState {
    pub epoch: Epoch,
    pub failed_at: Timestamp,
    pub error: TransportError,
}

impl SessionState {
    /// Get current state name for logging/audit
    pub fn state_name(&self) -> &'static str {
        match self {
            SessionState::Disconnected(_) => "Disconnected",
            SessionState::Connecting(_) => "Connecting",
            SessionState::Connected(_) => "Connected",
            SessionState::Failed(_) => "Failed",
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Disconnected(_) => SessionStatus::Disconnected,
            SessionState::Connecting(_) => SessionStatus::Connecting,
            SessionState::Connected(state) if state.live => SessionStatus::Live,
            SessionState::Connected(_) => SessionStatus::Connected,
            SessionState::Failed(_) => SessionStatus::Failed,
        }
    }

    /// Epoch of the transport this state owns, if any
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            SessionState::Disconnected(_) => None,
            SessionState::Connecting(state) => Some(state.epoch),
            SessionState::Connected(state) => Some(state.epoch),
            SessionState::Failed(state) => Some(state.epoch),
        }
    }

    /// Check if state allows command sending
    pub fn can_send_commands(&self) -> bool {
        matches!(self, SessionState::Connected(_))
    }
}

// ----------------------------------------------------------------------------
// State Transition Results
// ----------------------------------------------------------------------------

/// Result of handling one event
#[derive(Debug, Clone, Default)]
pub struct Transition {
    /// IO for the runtime, in order
    pub effects: Vec<Effect>,
    /// Notifications for presentation, in order
    pub app_events: Vec<AppEvent>,
    /// Audit trail entry
    pub audit_entry: Option<AuditEntry>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.app_events.is_empty()
    }
}

/// Audit trail entry for a handled event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub epoch: Epoch,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub effects_count: usize,
}

// ----------------------------------------------------------------------------
// Session Manager
// ----------------------------------------------------------------------------

/// The single session of this process
pub struct SessionManager<T: TimeSource = SystemTimeSource> {
    config: SessionConfig,
    state: SessionState,
    epoch: Epoch,
    tracker: LivenessTracker,
    cache: StateCache,
    audit_trail: VecDeque<AuditEntry>,
    time_source: T,
}

impl SessionManager<SystemTimeSource> {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_time_source(config, SystemTimeSource)
    }
}

impl<T: TimeSource> SessionManager<T> {
    pub fn with_time_source(config: SessionConfig, time_source: T) -> Result<Self> {
        config.validate()?;
        let tracker = LivenessTracker::new(config.max_unacked_probes, config.ack_matching);
        let state = SessionState::Disconnected(DisconnectedState {
            since: time_source.now(),
            cause: None,
        });
        Ok(Self {
            config,
            state,
            epoch: Epoch::default(),
            tracker,
            cache: StateCache::new(),
            audit_trail: VecDeque::with_capacity(AUDIT_TRAIL_CAPACITY),
            time_source,
        })
    }

    /// Process one event
    ///
    /// Events that make no sense for the current state (including anything
    /// tagged with a superseded epoch) are logged and ignored.
    pub fn handle(&mut self, event: SessionEvent) -> Transition {
        let from_state = self.state.state_name();
        let from_status = self.state.status();
        let event_name = event.name();
        let mut out = Transition::default();

        match event {
            SessionEvent::Connect => self.connect(&mut out),
            SessionEvent::ReconnectDue => match self.state {
                SessionState::Disconnected(_) | SessionState::Failed(_) => self.connect(&mut out),
                _ => debug!("Reconnect timer fired while {}, ignoring", from_state),
            },
            SessionEvent::TransportOpened { epoch } => self.on_transport_open(epoch, &mut out),
            SessionEvent::TransportMessage { epoch, payload } => {
                self.on_transport_message(epoch, &payload, &mut out)
            }
            SessionEvent::TransportClosed { epoch, reason } => {
                self.on_transport_close(epoch, reason, &mut out)
            }
            SessionEvent::LivenessTick { epoch } => self.on_liveness_tick(epoch, &mut out),
            SessionEvent::Reset => self.reset(&mut out),
            SessionEvent::Shutdown => self.shutdown(&mut out),
            SessionEvent::SendCommand(command) => self.send_command(command, &mut out),
        }

        let to_state = self.state.state_name();
        let to_status = self.state.status();
        if from_status != to_status {
            info!("Session {} -> {} on {}", from_status, to_status, event_name);
            out.app_events
                .push(AppEvent::StatusChanged { status: to_status });
        }

        let audit_entry = AuditEntry {
            timestamp: self.time_source.now(),
            epoch: self.epoch,
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            event: event_name.to_string(),
            effects_count: out.effects.len(),
        };
        if self.audit_trail.len() == AUDIT_TRAIL_CAPACITY {
            self.audit_trail.pop_front();
        }
        self.audit_trail.push_back(audit_entry.clone());
        out.audit_entry = Some(audit_entry);

        out
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn connect(&mut self, out: &mut Transition) {
        match &self.state {
            SessionState::Connecting(ConnectingState { epoch, .. })
            | SessionState::Connected(ConnectedState { epoch, .. }) => {
                debug!("Superseding transport {}", epoch);
                out.effects.push(Effect::StopLivenessTimer);
                out.effects.push(Effect::CloseTransport { epoch: *epoch });
            }
            _ => {}
        }
        out.effects.push(Effect::CancelReconnect);

        self.epoch = self.epoch.next();
        self.tracker = LivenessTracker::new(
            self.config.max_unacked_probes,
            self.config.ack_matching,
        );
        self.clear_cache(out);

        info!("Connecting to {} ({})", self.config.endpoint, self.epoch);
        self.state = SessionState::Connecting(ConnectingState {
            epoch: self.epoch,
            started: self.time_source.now(),
        });
        out.effects.push(Effect::OpenTransport {
            epoch: self.epoch,
            endpoint: self.config.endpoint.clone(),
        });
    }

    fn on_transport_open(&mut self, epoch: Epoch, out: &mut Transition) {
        match &self.state {
            SessionState::Connecting(state) if state.epoch == epoch => {}
            _ => {
                debug!("Ignoring open of transport {} while {}", epoch, self.state.state_name());
                return;
            }
        }

        self.clear_cache(out);
        self.tracker.reset();
        self.state = SessionState::Connected(ConnectedState {
            epoch,
            since: self.time_source.now(),
            live: false,
        });
        out.effects.push(Effect::StartLivenessTimer {
            epoch,
            interval: self.config.ping_interval(),
        });
    }

    fn on_transport_message(&mut self, epoch: Epoch, payload: &str, out: &mut Transition) {
        if self.connected_epoch() != Some(epoch) {
            debug!("Ignoring message for transport {} while {}", epoch, self.state.state_name());
            return;
        }
        debug!("Received frame: {}", payload);

        for message in decode_frame(payload) {
            match message {
                Ok(ServerMessage::Ack(received)) => self.on_ack(received, out),
                Ok(ServerMessage::Update(tree)) => {
                    let changes = self.cache.merge_update(tree);
                    if !changes.is_empty() {
                        debug!("State update changed {} leaves", changes.len());
                        out.app_events.push(AppEvent::StateChanged { changes });
                    }
                }
                Ok(ServerMessage::Alert(text)) => {
                    info!("Controller alert: {}", text);
                    out.app_events.push(AppEvent::Alert { text });
                }
                Err(error) => {
                    warn!("Dropping inbound message: {}", error);
                    out.app_events.push(AppEvent::ProtocolWarning { error });
                }
            }
        }
    }

    fn on_ack(&mut self, received: u64, out: &mut Transition) {
        match self.tracker.on_ack(received) {
            Ok(ack) => {
                debug!("Heartbeat {} acknowledged ({})", ack.sequence, ack.value);
                out.app_events.push(AppEvent::HeartbeatAcknowledged {
                    sequence: ack.sequence,
                    value: ack.value,
                });
                if ack.became_live {
                    if let SessionState::Connected(state) = &mut self.state {
                        state.live = true;
                    }
                    out.app_events.push(AppEvent::SessionLive);
                }
            }
            Err(error) => {
                warn!("Heartbeat desync: {}", error);
                out.app_events.push(AppEvent::ProtocolWarning { error });
            }
        }
    }

    fn on_transport_close(&mut self, epoch: Epoch, reason: String, out: &mut Transition) {
        if self.state.epoch() != Some(epoch) {
            debug!("Ignoring close of transport {} while {}", epoch, self.state.state_name());
            return;
        }

        match self.state {
            SessionState::Failed(_) => {
                debug!("Transport {} closed after liveness failure", epoch);
                self.enter_disconnected(None);
                return;
            }
            SessionState::Connected(_) => {
                error!("Transport {} closed: {}", epoch, reason);
                out.effects.push(Effect::StopLivenessTimer);
            }
            _ => error!("Connection attempt {} failed: {}", epoch, reason),
        }

        out.effects.push(Effect::ScheduleReconnect {
            delay: self.config.reconnect_delay(),
        });
        let cause = DisconnectCause::Closed { reason };
        out.app_events.push(AppEvent::Disconnected {
            cause: cause.clone(),
        });
        self.enter_disconnected(Some(cause));
    }

    fn on_liveness_tick(&mut self, epoch: Epoch, out: &mut Transition) {
        if self.connected_epoch() != Some(epoch) {
            debug!("Ignoring liveness tick for {} while {}", epoch, self.state.state_name());
            return;
        }

        match self.tracker.tick() {
            TickOutcome::Probe(probe) => {
                let frame = ClientMessage::Probe {
                    keyword: self.config.probe_keyword,
                    sequence: probe.sequence,
                }
                .encode();
                out.effects.push(Effect::SendFrame { epoch, frame });
                out.app_events.push(AppEvent::ProbeSent {
                    sequence: probe.sequence,
                    retries_left: probe.retries_left,
                });
            }
            TickOutcome::Failed { sequence, attempts } => {
                let error = TransportError::LivenessTimeout { sequence, attempts };
                error!("Transport {}: {}", epoch, error);
                out.effects.push(Effect::StopLivenessTimer);
                out.effects.push(Effect::CloseTransport { epoch });
                out.effects.push(Effect::ScheduleReconnect {
                    delay: self.config.reconnect_delay(),
                });
                out.app_events.push(AppEvent::Disconnected {
                    cause: DisconnectCause::LivenessTimeout { sequence, attempts },
                });
                self.state = SessionState::Failed(FailedState {
                    epoch,
                    failed_at: self.time_source.now(),
                    error,
                });
            }
        }
    }

    fn reset(&mut self, out: &mut Transition) {
        let Some(epoch) = self.state.epoch() else {
            debug!("Reset while disconnected, ignoring");
            return;
        };

        info!("Resetting session {}", epoch);
        out.effects.push(Effect::StopLivenessTimer);
        out.effects.push(Effect::CloseTransport { epoch });
        out.effects.push(Effect::ScheduleReconnect {
            delay: self.config.reconnect_delay(),
        });
        out.app_events.push(AppEvent::Disconnected {
            cause: DisconnectCause::Reset,
        });
        self.enter_disconnected(Some(DisconnectCause::Reset));
    }

    fn shutdown(&mut self, out: &mut Transition) {
        info!("Shutting down session");
        out.effects.push(Effect::StopLivenessTimer);
        out.effects.push(Effect::CancelReconnect);
        if let Some(epoch) = self.state.epoch() {
            out.effects.push(Effect::CloseTransport { epoch });
            out.app_events.push(AppEvent::Disconnected {
                cause: DisconnectCause::Shutdown,
            });
        }
        self.enter_disconnected(Some(DisconnectCause::Shutdown));
    }

    fn send_command(&mut self, command: Command, out: &mut Transition) {
        let epoch = match &self.state {
            SessionState::Connected(state)
                if state.live || !self.config.require_live_for_commands =>
            {
                state.epoch
            }
            _ => {
                let status = self.state.status();
                warn!("Dropping command ({}) while {}", command.describe(), status);
                out.app_events.push(AppEvent::CommandDropped {
                    command: command.describe(),
                    status,
                });
                return;
            }
        };

        debug!("Sending {}", command.describe());
        out.effects.push(Effect::SendFrame {
            epoch,
            frame: command.to_message().encode(),
        });
        if command.resets_session() {
            self.reset(out);
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn connected_epoch(&self) -> Option<Epoch> {
        match &self.state {
            SessionState::Connected(state) => Some(state.epoch),
            _ => None,
        }
    }

    fn enter_disconnected(&mut self, cause: Option<DisconnectCause>) {
        self.state = SessionState::Disconnected(DisconnectedState {
            since: self.time_source.now(),
            cause,
        });
    }

    fn clear_cache(&mut self, out: &mut Transition) {
        let stale_paths = self.cache.clear();
        if !stale_paths.is_empty() {
            out.app_events.push(AppEvent::CacheCleared { stale_paths });
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Most recently allocated epoch
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn tracker(&self) -> &LivenessTracker {
        &self.tracker
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit_trail.iter()
    }
}
