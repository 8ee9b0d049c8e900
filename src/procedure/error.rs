//! Procedure and builder errors.

use crate::machine::MachineError;
use thiserror::Error;

/// Errors returned by [`Procedure`](super::Procedure) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcedureError {
    #[error("procedure '{name}' was already started")]
    AlreadyStarted { name: String },

    #[error("procedure '{name}' has not been started")]
    NotStarted { name: String },

    /// Registration or lookup failure from the underlying machine:
    /// `DuplicateState`, `UnknownState` or `NotConfigured`.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// A step hook failed while the procedure was running. The procedure
    /// has been aborted.
    #[error("procedure '{name}' aborted: {source}")]
    Lifecycle { name: String, source: MachineError },
}

/// Errors collected while validating a [`ProcedureBuilder`](super::ProcedureBuilder).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("procedure name is empty")]
    EmptyName,

    #[error("no steps defined. Add at least one with .step(..)")]
    NoSteps,

    #[error("step '{0}' was added more than once")]
    DuplicateStep(&'static str),

    #[error("blackboard seed '{key}' could not be stored: {message}")]
    InvalidSeed { key: String, message: String },

    #[error("blackboard seed '{0}' was given more than once")]
    DuplicateSeed(String),

    #[error("procedure definition has {} problem(s): {}", .0.len(), join(.0))]
    Invalid(Vec<BuildError>),

    /// A step's `init` hook failed while the procedure was being assembled.
    #[error(transparent)]
    Step(#[from] MachineError),
}

fn join(errors: &[BuildError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
