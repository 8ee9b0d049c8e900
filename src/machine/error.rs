//! Errors raised by the state machine, its states and its blackboard.

use std::fmt;
use thiserror::Error;

/// Errors reading or writing blackboard entries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlackboardError {
    #[error("required blackboard key '{0}' is not set")]
    MissingContext(String),

    #[error("blackboard key '{key}' holds an incompatible value: {message}")]
    Decode { key: String, message: String },

    #[error("value for blackboard key '{key}' could not be stored: {message}")]
    Encode { key: String, message: String },
}

/// Failure reported by a state's own hook.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error(transparent)]
    Blackboard(#[from] BlackboardError),

    #[error("{0}")]
    Failed(String),
}

impl StateError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Which hook of a state was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Init,
    Activate,
    Deactivate,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
        })
    }
}

/// Errors returned by [`StateMachine`](super::StateMachine) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MachineError {
    #[error("state '{0}' is already registered")]
    DuplicateState(&'static str),

    #[error("state '{new}' cannot be initial: '{existing}' already is")]
    DuplicateInitial {
        existing: &'static str,
        new: &'static str,
    },

    #[error("state '{0}' is not registered")]
    UnknownState(&'static str),

    #[error("no initial state configured")]
    NotConfigured,

    #[error("machine already started in state '{0}'")]
    AlreadyStarted(&'static str),

    #[error("transition to '{target}' requested while another transition is in flight")]
    TransitionInFlight { target: &'static str },

    #[error("{phase} hook of state '{state}' failed: {source}")]
    Hook {
        state: &'static str,
        phase: HookPhase,
        source: StateError,
    },
}
