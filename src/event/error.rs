//! Listener and dispatch errors.

use super::EventId;
use thiserror::Error;

/// Failure returned by a single listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("expected a {expected} parameter, got none")]
    MissingParam { expected: &'static str },

    #[error("expected a {expected} parameter, got {found}")]
    UnexpectedParam {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    Failed(String),
}

impl ListenerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Every listener failure from one immediate dispatch. All listeners run
/// even when some fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} listener(s) failed for event {event}: {}", .failures.len(), join(.failures))]
pub struct DispatchError {
    pub event: EventId,
    pub failures: Vec<ListenerError>,
}

fn join(failures: &[ListenerError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
