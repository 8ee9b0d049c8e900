//! Process-wide channel for failures nobody awaited.
//!
//! Deferred event dispatch and spawned procedures run fire-and-forget: the
//! code that scheduled them is long gone by the time they fail. Instead of
//! letting such failures vanish, they are logged and broadcast on a
//! [`FailureSink`] that hosts and tests can subscribe to.

use crate::event::EventId;
use crate::procedure::ProcedureId;
use chrono::{DateTime, Utc};
use std::fmt;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Where an unobserved failure came from.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureOrigin {
    /// A listener failed during next-frame or delayed dispatch.
    Event(EventId),
    /// A spawned procedure ended with an error.
    Procedure { id: ProcedureId, name: String },
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event {id}"),
            Self::Procedure { name, .. } => write!(f, "procedure '{name}'"),
        }
    }
}

/// One failure report.
#[derive(Clone, Debug)]
pub struct Failure {
    pub origin: FailureOrigin,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Cloneable sender side of the unobserved failure channel.
#[derive(Clone, Debug)]
pub struct FailureSink {
    tx: broadcast::Sender<Failure>,
}

impl FailureSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a sink whose subscribers buffer up to `capacity` reports.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every failure reported after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Failure> {
        self.tx.subscribe()
    }

    /// Log a failure and broadcast it to current subscribers.
    pub fn report(&self, origin: FailureOrigin, message: impl Into<String>) {
        let failure = Failure {
            origin,
            message: message.into(),
            at: Utc::now(),
        };
        tracing::error!(origin = %failure.origin, "unobserved failure: {}", failure.message);
        // No subscribers is fine; the log line above is the record.
        let _ = self.tx.send(failure);
    }
}

impl Default for FailureSink {
    fn default() -> Self {
        Self::new()
    }
}
