//! Heartbeat probe bookkeeping
//!
//! The tracker is pure: the session feeds it interval ticks and inbound
//! acknowledgements and acts on what it returns.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::AckMatching;
use crate::errors::ProtocolError;

/// The current probe window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub sequence: u64,
    pub outstanding: bool,
    pub retries_left: u32,
}

/// Result of one liveness tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Send a probe carrying this sequence
    Probe(Probe),
    /// Retries exhausted without an acknowledgement
    Failed { sequence: u64, attempts: u32 },
}

/// An accepted acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    /// Sequence of the probe that was acknowledged
    pub sequence: u64,
    /// Number carried by the ACK message
    pub value: u64,
    /// True for the first accepted acknowledgement of the session
    pub became_live: bool,
}

/// Probe sequence, retry budget and acknowledgement state for one session
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    max_retries: u32,
    matching: AckMatching,
    sequence: u64,
    retries_left: u32,
    acknowledged: bool,
    started: bool,
    live: bool,
}

impl LivenessTracker {
    pub fn new(max_retries: u32, matching: AckMatching) -> Self {
        Self {
            max_retries,
            matching,
            sequence: 0,
            retries_left: max_retries,
            acknowledged: false,
            started: false,
            live: false,
        }
    }

    /// Return to the initial window: sequence 0, full retries, not live
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.retries_left = self.max_retries;
        self.acknowledged = false;
        self.started = false;
        self.live = false;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.started && !self.acknowledged && self.retries_left == 0 {
            debug!(
                "Probe {} unacknowledged after {} attempts",
                self.sequence, self.max_retries
            );
            return TickOutcome::Failed {
                sequence: self.sequence,
                attempts: self.max_retries,
            };
        }

        if !self.started {
            self.started = true;
            self.retries_left = self.max_retries;
        } else if self.acknowledged {
            self.sequence += 1;
            self.retries_left = self.max_retries;
            self.acknowledged = false;
        }

        self.retries_left = self.retries_left.saturating_sub(1);
        trace!(
            "Probe {} ({} retries left)",
            self.sequence,
            self.retries_left
        );

        TickOutcome::Probe(Probe {
            sequence: self.sequence,
            outstanding: true,
            retries_left: self.retries_left,
        })
    }

    /// Match an inbound ACK against the outstanding probe
    pub fn on_ack(&mut self, received: u64) -> Result<AckOutcome, ProtocolError> {
        if !self.started {
            return Err(ProtocolError::UnsolicitedAck { received });
        }
        if self.matching == AckMatching::Strict && received != self.sequence {
            return Err(ProtocolError::SequenceMismatch {
                expected: self.sequence,
                received,
            });
        }

        self.acknowledged = true;
        self.retries_left = self.max_retries;
        let became_live = !self.live;
        self.live = true;

        Ok(AckOutcome {
            sequence: self.sequence,
            value: received,
            became_live,
        })
    }

    /// Current probe window, if a probe has been sent
    pub fn probe(&self) -> Option<Probe> {
        self.started.then_some(Probe {
            sequence: self.sequence,
            outstanding: !self.acknowledged,
            retries_left: self.retries_left,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn retries_left(&self) -> u32 {
        self.retries_left
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether an acknowledgement has been accepted since the last reset
    pub fn is_live(&self) -> bool {
        self.live
    }
}
