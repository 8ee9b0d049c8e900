//! The step contract and the context a step runs with.

use super::handle::{Command, ProcedureHandle};
use crate::machine::{Blackboard, MachineState, Scope, StateError, StateKey};
use async_trait::async_trait;

/// One unit of work in a procedure.
///
/// A step's identity is its type: a procedure holds at most one step of
/// each type, and [`Procedure::goto_step`](super::Procedure::goto_step)
/// addresses steps by type. The same instance is reused every time the
/// step is entered.
///
/// `activate` must eventually lead to exactly one of
/// [`StepContext::finish`], [`StepContext::finish_and_goto`] or
/// [`StepContext::abort`], either before it returns or later from
/// something it started. Those calls queue a request; the procedure applies
/// it once the current transition has completed.
///
/// Requests are never dropped. Every queued request, from a step or from a
/// [`ProcedureHandle`], is applied in order against the step that is
/// current at that point. A step that finishes after something else has
/// already moved the procedure on therefore advances the new current step.
#[async_trait]
pub trait Step: Send + 'static {
    /// Runs once, when the step is added to its procedure.
    fn init(&mut self, _cx: &mut StepContext<'_>) -> Result<(), StateError> {
        Ok(())
    }

    async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError>;

    async fn deactivate(&mut self, _cx: &mut StepContext<'_>) -> Result<(), StateError> {
        Ok(())
    }
}

/// What a step sees while one of its hooks runs.
pub struct StepContext<'a> {
    step: StateKey,
    blackboard: &'a mut Blackboard,
    procedure: &'a ProcedureHandle,
}

impl<'a> StepContext<'a> {
    fn from_scope(scope: Scope<'a, ProcedureHandle>) -> Self {
        Self {
            step: scope.key,
            blackboard: scope.blackboard,
            procedure: scope.context,
        }
    }

    /// Identity of the running step.
    pub fn step(&self) -> StateKey {
        self.step
    }

    /// The procedure's blackboard.
    pub fn blackboard(&mut self) -> &mut Blackboard {
        self.blackboard
    }

    pub fn procedure(&self) -> &ProcedureHandle {
        self.procedure
    }

    /// Advance to the next step, or finish the procedure after the last.
    pub fn finish(&self) {
        self.procedure.send(Command::Next {
            from: Some(self.step),
        });
    }

    /// Jump to step `T` instead of the next one.
    pub fn finish_and_goto<T: Step>(&self) {
        self.procedure.send(Command::Goto {
            from: Some(self.step),
            target: StateKey::of::<T>(),
        });
    }

    /// Abort the procedure.
    pub fn abort(&self) {
        tracing::info!(procedure = self.procedure.name(), step = %self.step, "step requested abort");
        self.procedure.send(Command::Abort {
            from: Some(self.step),
        });
    }
}

/// Runs a [`Step`] as a state of the procedure's machine.
pub(crate) struct StepState<S>(pub(crate) S);

#[async_trait]
impl<S: Step> MachineState<ProcedureHandle> for StepState<S> {
    fn init(&mut self, scope: Scope<'_, ProcedureHandle>) -> Result<(), StateError> {
        self.0.init(&mut StepContext::from_scope(scope))
    }

    async fn activate(&mut self, scope: Scope<'_, ProcedureHandle>) -> Result<(), StateError> {
        self.0.activate(&mut StepContext::from_scope(scope)).await
    }

    async fn deactivate(&mut self, scope: Scope<'_, ProcedureHandle>) -> Result<(), StateError> {
        self.0.deactivate(&mut StepContext::from_scope(scope)).await
    }
}
