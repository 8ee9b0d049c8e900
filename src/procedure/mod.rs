//! Ordered step execution on top of the state machine.
//!
//! A [`Procedure`] is a named list of [`Step`]s run one at a time. Each step
//! is a state of the procedure's own [`StateMachine`]; the first step added
//! is the initial state. Steps move the procedure along by calling
//! [`StepContext::finish`], [`StepContext::finish_and_goto`] or
//! [`StepContext::abort`]. Those calls only queue a request. The procedure
//! applies queued requests between transitions, so a step that finishes
//! from inside its own `activate` never re-enters the machine.
//!
//! Lifecycle: `NotStarted → Running(0) → … → Finished`, with `Aborted`
//! reachable from any running state. Nothing leaves `Finished` or
//! `Aborted`.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use stagehand::machine::StateError;
//! use stagehand::procedure::{Procedure, ProcedureOutcome, Step, StepContext};
//!
//! struct Fetch;
//! struct Parse;
//!
//! #[async_trait]
//! impl Step for Fetch {
//!     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
//!         cx.blackboard().write("body", &"{\"ok\":true}")?;
//!         cx.finish();
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl Step for Parse {
//!     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
//!         let body: String = cx.blackboard().read("body")?;
//!         cx.blackboard().write("length", &body.len())?;
//!         cx.finish();
//!         Ok(())
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut procedure = Procedure::new("Download");
//! procedure.add_step(Fetch).unwrap();
//! procedure.add_step(Parse).unwrap();
//!
//! assert_eq!(procedure.run().await.unwrap(), ProcedureOutcome::Finished);
//! assert_eq!(procedure.blackboard().read::<usize>("length").unwrap(), 11);
//! # });
//! ```

mod builder;
mod error;
mod handle;
mod registry;
mod step;

pub use builder::ProcedureBuilder;
pub use error::{BuildError, ProcedureError};
pub use handle::{ProcedureHandle, ProcedureId};
pub use registry::ProcedureRegistry;
pub use step::{Step, StepContext};

use crate::core::{State, TransitionHistory};
use crate::failure::{FailureOrigin, FailureSink};
use crate::machine::{Blackboard, MachineError, MachineState, StateKey, StateMachine};
use handle::Command;
use serde::{Deserialize, Serialize};
use std::fmt;
use step::StepState;
use tokio::sync::{mpsc, watch};

/// Where a procedure is in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureStatus {
    NotStarted,
    Running { index: usize, step: String },
    Finished,
    Aborted,
}

impl State for ProcedureStatus {
    fn name(&self) -> &str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::Running { .. } => "Running",
            Self::Finished => "Finished",
            Self::Aborted => "Aborted",
        }
    }

    fn is_final(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    fn is_error(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl fmt::Display for ProcedureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running { index, step } => write!(f, "Running({index}: {step})"),
            other => f.write_str(other.name()),
        }
    }
}

/// How a driven procedure ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcedureOutcome {
    Finished,
    Aborted,
}

/// Diagnostic view of a procedure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcedureSnapshot {
    pub id: ProcedureId,
    pub name: String,
    pub status: ProcedureStatus,
    pub steps: Vec<String>,
    pub progress: f32,
    pub changing_step: bool,
    pub blackboard: Blackboard,
    pub history: TransitionHistory,
}

/// A named, ordered sequence of steps.
pub struct Procedure {
    handle: ProcedureHandle,
    machine: StateMachine<ProcedureHandle>,
    steps: Vec<StateKey>,
    index: Option<usize>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (handle, commands) = ProcedureHandle::new(&name);
        Self {
            machine: StateMachine::with_context(handle.clone()),
            handle,
            steps: Vec::new(),
            index: None,
            commands,
        }
    }

    /// Start describing a procedure whose definition is validated as a
    /// whole.
    pub fn builder(name: impl Into<String>) -> ProcedureBuilder {
        ProcedureBuilder::new(name)
    }

    /// Append `step` and run its `init` hook. The first step added is where
    /// the procedure starts.
    pub fn add_step<S: Step>(&mut self, step: S) -> Result<(), ProcedureError> {
        Ok(self.add_boxed(StateKey::of::<S>(), Box::new(StepState(step)))?)
    }

    pub(crate) fn add_boxed(
        &mut self,
        key: StateKey,
        state: Box<dyn MachineState<ProcedureHandle>>,
    ) -> Result<(), MachineError> {
        self.machine.register(key, state, self.steps.is_empty())?;
        self.steps.push(key);
        Ok(())
    }

    /// Enter the first step.
    pub async fn start(&mut self) -> Result<(), ProcedureError> {
        if self.status() != ProcedureStatus::NotStarted {
            return Err(ProcedureError::AlreadyStarted {
                name: self.name().to_string(),
            });
        }
        let Some(&first) = self.steps.first() else {
            return Err(MachineError::NotConfigured.into());
        };
        tracing::info!(procedure = self.name(), steps = self.steps.len(), "procedure started");
        self.enter(0, first).await
    }

    /// Leave the current step and enter the next one, or finish the
    /// procedure when the current step is the last.
    ///
    /// Ignored once the procedure is finished or aborted.
    pub async fn next_step(&mut self) -> Result<(), ProcedureError> {
        if !self.accepts_transitions("next")? {
            return Ok(());
        }
        let next = self.index.map_or(0, |i| i + 1);
        match self.steps.get(next) {
            Some(&key) => self.enter(next, key).await,
            None => {
                self.finish().await;
                Ok(())
            }
        }
    }

    /// Jump to step `T`, wherever it sits in the order.
    pub async fn goto_step<T: Step>(&mut self) -> Result<(), ProcedureError> {
        self.goto(StateKey::of::<T>()).await
    }

    /// Jump to the step identified by `target`.
    ///
    /// Fails with [`MachineError::UnknownState`] if no such step was added.
    /// Ignored once the procedure is finished or aborted.
    pub async fn goto(&mut self, target: StateKey) -> Result<(), ProcedureError> {
        if !self.accepts_transitions("goto")? {
            return Ok(());
        }
        let Some(index) = self.steps.iter().position(|k| *k == target) else {
            tracing::error!(procedure = self.name(), step = %target, "goto to a step that was never added");
            return Err(MachineError::UnknownState(target.name()).into());
        };
        self.enter(index, target).await
    }

    /// Stop the procedure for good: deactivate the current step and mark
    /// the procedure `Aborted`. Side effects of earlier steps are not
    /// rolled back. A no-op once finished or aborted.
    pub async fn abort(&mut self) {
        let status = self.status();
        if status.is_final() {
            return;
        }
        if status != ProcedureStatus::NotStarted {
            self.stop_machine().await;
        }
        self.handle.publish(ProcedureStatus::Aborted);
        tracing::info!(procedure = self.name(), "procedure aborted");
    }

    /// Start the procedure if needed, then apply step requests until it is
    /// finished or aborted.
    ///
    /// If a request fails, the procedure is aborted and the error returned.
    pub async fn run(&mut self) -> Result<ProcedureOutcome, ProcedureError> {
        if self.status() == ProcedureStatus::NotStarted {
            self.start().await?;
        }
        loop {
            match self.status() {
                ProcedureStatus::Finished => return Ok(ProcedureOutcome::Finished),
                ProcedureStatus::Aborted => return Ok(ProcedureOutcome::Aborted),
                _ => {}
            }
            // The procedure's own handle keeps the sender alive.
            let Some(command) = self.commands.recv().await else {
                self.abort().await;
                continue;
            };
            if let Err(e) = self.apply(command).await {
                self.abort().await;
                return Err(e);
            }
        }
    }

    /// Apply every request already queued, without waiting for more.
    /// Returns how many were applied.
    ///
    /// Before [`start`](Self::start) nothing is drained and
    /// [`ProcedureError::NotStarted`] is returned. If a request fails, the
    /// procedure is aborted and the error returned, as with
    /// [`run`](Self::run).
    pub async fn pump(&mut self) -> Result<usize, ProcedureError> {
        if self.status() == ProcedureStatus::NotStarted {
            return Err(ProcedureError::NotStarted {
                name: self.name().to_string(),
            });
        }
        let mut applied = 0;
        while !self.is_terminal() {
            let Ok(command) = self.commands.try_recv() else {
                break;
            };
            if let Err(e) = self.apply(command).await {
                self.abort().await;
                return Err(e);
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Drive the procedure on its own task. A failure is reported to
    /// `failures`; observe completion through the returned handle.
    pub fn spawn(mut self, failures: FailureSink) -> ProcedureHandle {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                failures.report(
                    FailureOrigin::Procedure {
                        id: self.id(),
                        name: self.name().to_string(),
                    },
                    e.to_string(),
                );
            }
        });
        handle
    }

    async fn apply(&mut self, command: Command) -> Result<(), ProcedureError> {
        if let Some(from) = command.origin() {
            if self.machine.current() != Some(from) {
                tracing::debug!(
                    procedure = self.name(),
                    step = %from,
                    ?command,
                    "applying request from a step that is no longer active"
                );
            }
        }

        match command {
            Command::Next { .. } => self.next_step().await,
            Command::Goto { target, .. } => self.goto(target).await,
            Command::Abort { .. } => {
                self.abort().await;
                Ok(())
            }
        }
    }

    fn accepts_transitions(&self, op: &str) -> Result<bool, ProcedureError> {
        match self.status() {
            ProcedureStatus::NotStarted => Err(ProcedureError::NotStarted {
                name: self.name().to_string(),
            }),
            status if status.is_final() => {
                tracing::warn!(procedure = self.name(), %status, op, "procedure is over; request ignored");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn enter(&mut self, index: usize, key: StateKey) -> Result<(), ProcedureError> {
        self.index = Some(index);
        self.handle.publish(ProcedureStatus::Running {
            index,
            step: key.name().to_string(),
        });

        self.handle.set_changing(true);
        let result = self.machine.change_state(key).await;
        self.handle.set_changing(false);

        match result {
            Ok(()) => Ok(()),
            Err(source) => {
                tracing::error!(procedure = self.name(), step = %key, error = %source, "step failed");
                self.abort().await;
                Err(ProcedureError::Lifecycle {
                    name: self.name().to_string(),
                    source,
                })
            }
        }
    }

    async fn finish(&mut self) {
        self.stop_machine().await;
        self.handle.publish(ProcedureStatus::Finished);
        tracing::info!(procedure = self.name(), "procedure finished");
    }

    async fn stop_machine(&mut self) {
        self.handle.set_changing(true);
        if let Err(e) = self.machine.stop().await {
            tracing::warn!(procedure = self.name(), error = %e, "could not deactivate current step");
        }
        self.handle.set_changing(false);
    }

    pub fn id(&self) -> ProcedureId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// A cloneable handle for observers, steps elsewhere and the registry.
    pub fn handle(&self) -> ProcedureHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> ProcedureStatus {
        self.handle.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.handle.is_terminal()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcedureStatus> {
        self.handle.subscribe()
    }

    pub fn is_changing_step(&self) -> bool {
        self.handle.is_changing_step()
    }

    /// Index of the current (or, once over, the last entered) step.
    pub fn current_index(&self) -> Option<usize> {
        self.index
    }

    /// The active step, `None` before start and after finish or abort.
    pub fn current_step(&self) -> Option<StateKey> {
        self.machine.current()
    }

    pub fn steps(&self) -> &[StateKey] {
        &self.steps
    }

    /// `(index + 1) / step count` of the last entered step; `0.0` before
    /// start.
    pub fn progress(&self) -> f32 {
        match self.index {
            Some(i) if !self.steps.is_empty() => (i + 1) as f32 / self.steps.len() as f32,
            _ => 0.0,
        }
    }

    pub fn blackboard(&self) -> &Blackboard {
        self.machine.blackboard()
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        self.machine.blackboard_mut()
    }

    pub fn history(&self) -> &TransitionHistory {
        self.machine.history()
    }

    pub fn snapshot(&self) -> ProcedureSnapshot {
        ProcedureSnapshot {
            id: self.id(),
            name: self.name().to_string(),
            status: self.status(),
            steps: self.steps.iter().map(|k| k.name().to_string()).collect(),
            progress: self.progress(),
            changing_step: self.is_changing_step(),
            blackboard: self.blackboard().clone(),
            history: self.history().clone(),
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Trace = Arc<Mutex<Vec<String>>>;

    fn note(cx: &mut StepContext<'_>, what: &str) -> Result<(), StateError> {
        let mut trace: Vec<String> = cx.blackboard().read_or("trace", Vec::new())?;
        trace.push(format!("{what} {}", cx.step()));
        cx.blackboard().write("trace", &trace)?;
        Ok(())
    }

    fn trace_of(procedure: &Procedure) -> Vec<String> {
        procedure.blackboard().read("trace").unwrap_or_default()
    }

    /// Finishes as soon as it is entered.
    struct Quick;
    /// Waits to be told what to do.
    struct Idle;
    /// Like `Idle`, under another type.
    struct Hold;
    /// Jumps back to `Quick`.
    struct Loop;
    struct Faulty;
    struct Watcher(Trace);

    #[async_trait]
    impl Step for Quick {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")?;
            cx.finish();
            Ok(())
        }

        async fn deactivate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "leave")
        }
    }

    #[async_trait]
    impl Step for Idle {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")
        }

        async fn deactivate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "leave")
        }
    }

    #[async_trait]
    impl Step for Hold {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")
        }
    }

    #[async_trait]
    impl Step for Loop {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")?;
            let laps: u32 = cx.blackboard().read_or("laps", 0)?;
            cx.blackboard().write("laps", &(laps + 1))?;
            if laps == 0 {
                cx.finish_and_goto::<Quick>();
            } else {
                cx.finish();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Step for Faulty {
        async fn activate(&mut self, _cx: &mut StepContext<'_>) -> Result<(), StateError> {
            Err(StateError::msg("disk on fire"))
        }
    }

    #[async_trait]
    impl Step for Watcher {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            let handle = cx.procedure();
            self.0.lock().unwrap().push(format!(
                "{} changing={} status={}",
                handle.name(),
                handle.is_changing_step(),
                handle.status()
            ));
            cx.finish();
            Ok(())
        }
    }

    #[test]
    fn status_state_flags() {
        assert_eq!(ProcedureStatus::NotStarted.name(), "NotStarted");
        let running = ProcedureStatus::Running {
            index: 1,
            step: "Idle".into(),
        };
        assert_eq!(running.name(), "Running");
        assert_eq!(running.to_string(), "Running(1: Idle)");
        assert!(!running.is_final());
        assert!(ProcedureStatus::Finished.is_final());
        assert!(!ProcedureStatus::Finished.is_error());
        assert!(ProcedureStatus::Aborted.is_final());
        assert!(ProcedureStatus::Aborted.is_error());
    }

    #[test]
    fn duplicate_step_type_is_rejected() {
        let mut procedure = Procedure::new("Dup");
        procedure.add_step(Idle).unwrap();
        assert_eq!(
            procedure.add_step(Idle),
            Err(ProcedureError::Machine(MachineError::DuplicateState("Idle")))
        );
        assert_eq!(procedure.steps().len(), 1);
    }

    #[tokio::test]
    async fn starting_without_steps_is_not_configured() {
        let mut procedure = Procedure::new("Empty");
        assert_eq!(
            procedure.start().await,
            Err(ProcedureError::Machine(MachineError::NotConfigured))
        );
        assert_eq!(procedure.status(), ProcedureStatus::NotStarted);
    }

    #[tokio::test]
    async fn start_enters_first_step_once() {
        let mut procedure = Procedure::new("Once");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Quick).unwrap();

        procedure.start().await.unwrap();
        assert_eq!(
            procedure.status(),
            ProcedureStatus::Running {
                index: 0,
                step: "Idle".into()
            }
        );
        assert!(matches!(
            procedure.start().await,
            Err(ProcedureError::AlreadyStarted { .. })
        ));
        assert_eq!(trace_of(&procedure), vec!["enter Idle"]);
    }

    #[tokio::test]
    async fn next_before_start_is_an_error() {
        let mut procedure = Procedure::new("Early");
        procedure.add_step(Idle).unwrap();
        assert!(matches!(
            procedure.next_step().await,
            Err(ProcedureError::NotStarted { .. })
        ));
    }

    #[tokio::test]
    async fn next_past_last_step_finishes() {
        let mut procedure = Procedure::new("Short");
        procedure.add_step(Idle).unwrap();

        procedure.start().await.unwrap();
        procedure.next_step().await.unwrap();

        assert_eq!(procedure.status(), ProcedureStatus::Finished);
        assert!(procedure.current_step().is_none());
        assert_eq!(procedure.progress(), 1.0);
        assert_eq!(trace_of(&procedure), vec!["enter Idle", "leave Idle"]);

        procedure.next_step().await.unwrap();
        assert_eq!(procedure.status(), ProcedureStatus::Finished);
    }

    #[tokio::test]
    async fn run_follows_finish_and_goto() {
        let mut procedure = Procedure::new("Laps");
        procedure.add_step(Quick).unwrap();
        procedure.add_step(Loop).unwrap();

        assert_eq!(procedure.run().await.unwrap(), ProcedureOutcome::Finished);
        assert_eq!(
            trace_of(&procedure),
            vec![
                "enter Quick",
                "leave Quick",
                "enter Loop",
                "enter Quick",
                "leave Quick",
                "enter Loop",
            ]
        );
        assert_eq!(
            procedure.history().path(),
            vec!["Quick", "Loop", "Quick", "Loop"]
        );
    }

    #[tokio::test]
    async fn goto_resyncs_index() {
        let mut procedure = Procedure::new("Jump");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Quick).unwrap();
        procedure.add_step(Loop).unwrap();
        procedure.start().await.unwrap();

        procedure.goto_step::<Loop>().await.unwrap();
        assert_eq!(procedure.current_index(), Some(2));
        assert!((procedure.progress() - 1.0).abs() < f32::EPSILON);

        procedure.goto_step::<Idle>().await.unwrap();
        assert_eq!(procedure.current_index(), Some(0));
        procedure.next_step().await.unwrap();
        assert_eq!(procedure.current_step(), Some(StateKey::of::<Quick>()));
    }

    #[tokio::test]
    async fn goto_unknown_step_is_rejected() {
        let mut procedure = Procedure::new("Lost");
        procedure.add_step(Idle).unwrap();
        procedure.start().await.unwrap();

        assert_eq!(
            procedure.goto_step::<Faulty>().await,
            Err(ProcedureError::Machine(MachineError::UnknownState("Faulty")))
        );
        assert_eq!(procedure.current_step(), Some(StateKey::of::<Idle>()));
    }

    #[tokio::test]
    async fn abort_deactivates_and_blocks_further_moves() {
        let mut procedure = Procedure::new("Stop");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Quick).unwrap();
        procedure.start().await.unwrap();

        procedure.abort().await;
        procedure.next_step().await.unwrap();
        procedure.goto_step::<Quick>().await.unwrap();

        assert_eq!(procedure.status(), ProcedureStatus::Aborted);
        assert_eq!(trace_of(&procedure), vec!["enter Idle", "leave Idle"]);
    }

    #[tokio::test]
    async fn failing_step_aborts_the_procedure() {
        let mut procedure = Procedure::new("Doomed");
        procedure.add_step(Quick).unwrap();
        procedure.add_step(Faulty).unwrap();
        procedure.add_step(Idle).unwrap();

        let err = procedure.run().await.unwrap_err();
        assert!(matches!(
            err,
            ProcedureError::Lifecycle {
                source: MachineError::Hook { state: "Faulty", .. },
                ..
            }
        ));
        assert_eq!(procedure.status(), ProcedureStatus::Aborted);
        assert!(!trace_of(&procedure).contains(&"enter Idle".to_string()));
    }

    /// Nudges itself along from outside and also finishes.
    struct Nudge;
    /// Aborts as soon as it is entered.
    struct Bail;
    /// Jumps to a step that was never added.
    struct Astray;

    #[async_trait]
    impl Step for Nudge {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")?;
            cx.procedure().request_next();
            cx.finish();
            Ok(())
        }
    }

    #[async_trait]
    impl Step for Bail {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            note(cx, "enter")?;
            cx.abort();
            Ok(())
        }
    }

    #[async_trait]
    impl Step for Astray {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            cx.finish_and_goto::<Faulty>();
            Ok(())
        }
    }

    #[tokio::test]
    async fn outside_and_step_requests_both_advance() {
        let mut procedure = Procedure::new("Doubled");
        procedure.add_step(Nudge).unwrap();
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Hold).unwrap();

        procedure.start().await.unwrap();
        assert_eq!(procedure.pump().await.unwrap(), 2);

        assert_eq!(procedure.current_step(), Some(StateKey::of::<Hold>()));
        assert_eq!(procedure.current_index(), Some(2));
        assert_eq!(procedure.history().path(), vec!["Nudge", "Idle", "Hold"]);
    }

    #[tokio::test]
    async fn late_finish_advances_the_current_step() {
        let mut procedure = Procedure::new("Late");
        procedure.add_step(Quick).unwrap();
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Hold).unwrap();

        procedure.start().await.unwrap();
        // Quick queued a finish; move on before it is applied.
        procedure.next_step().await.unwrap();
        assert_eq!(procedure.pump().await.unwrap(), 1);

        assert_eq!(procedure.current_step(), Some(StateKey::of::<Hold>()));
    }

    #[tokio::test]
    async fn late_abort_stops_the_current_step() {
        let mut procedure = Procedure::new("LateAbort");
        procedure.add_step(Bail).unwrap();
        procedure.add_step(Idle).unwrap();

        procedure.start().await.unwrap();
        procedure.next_step().await.unwrap();
        assert_eq!(procedure.pump().await.unwrap(), 1);

        assert_eq!(procedure.status(), ProcedureStatus::Aborted);
        assert_eq!(
            trace_of(&procedure),
            vec!["enter Bail", "enter Idle", "leave Idle"]
        );
    }

    #[tokio::test]
    async fn failed_request_during_pump_aborts() {
        let mut procedure = Procedure::new("Astray");
        procedure.add_step(Astray).unwrap();
        procedure.add_step(Idle).unwrap();

        procedure.start().await.unwrap();
        assert_eq!(
            procedure.pump().await,
            Err(ProcedureError::Machine(MachineError::UnknownState("Faulty")))
        );

        assert_eq!(procedure.status(), ProcedureStatus::Aborted);
        assert!(procedure.current_step().is_none());
    }

    #[tokio::test]
    async fn pump_before_start_keeps_requests_queued() {
        let mut procedure = Procedure::new("Queued");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Hold).unwrap();
        procedure.handle().request_next();

        assert!(matches!(
            procedure.pump().await,
            Err(ProcedureError::NotStarted { .. })
        ));
        assert_eq!(procedure.status(), ProcedureStatus::NotStarted);

        procedure.start().await.unwrap();
        assert_eq!(procedure.pump().await.unwrap(), 1);
        assert_eq!(procedure.current_step(), Some(StateKey::of::<Hold>()));
    }

    #[tokio::test]
    async fn external_requests_go_through_the_handle() {
        let mut procedure = Procedure::new("Remote");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Hold).unwrap();
        procedure.start().await.unwrap();

        let handle = procedure.handle();
        handle.request_next();
        assert_eq!(procedure.pump().await.unwrap(), 1);
        assert_eq!(procedure.current_step(), Some(StateKey::of::<Hold>()));

        handle.request_abort();
        assert_eq!(procedure.run().await.unwrap(), ProcedureOutcome::Aborted);
        assert_eq!(handle.status(), ProcedureStatus::Aborted);
    }

    #[tokio::test]
    async fn steps_see_changing_flag_and_status() {
        let seen = Trace::default();
        let mut procedure = Procedure::new("Observed");
        procedure.add_step(Watcher(seen.clone())).unwrap();

        procedure.run().await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Observed changing=true status=Running(0: Watcher)"]
        );
        assert!(!procedure.is_changing_step());
    }

    #[tokio::test]
    async fn subscribers_see_every_step() {
        let mut procedure = Procedure::new("Watched");
        procedure.add_step(Quick).unwrap();
        procedure.add_step(Loop).unwrap();
        let handle = procedure.handle();

        let waiter = tokio::spawn(async move { handle.wait_terminal().await });
        procedure.run().await.unwrap();

        assert_eq!(waiter.await.unwrap(), ProcedureStatus::Finished);
    }

    #[tokio::test]
    async fn spawned_failure_reaches_the_sink() {
        let sink = FailureSink::new();
        let mut failures = sink.subscribe();
        let mut procedure = Procedure::new("Background");
        procedure.add_step(Faulty).unwrap();
        let id = procedure.id();

        let handle = procedure.spawn(sink);
        assert_eq!(handle.wait_terminal().await, ProcedureStatus::Aborted);

        let failure = failures.recv().await.unwrap();
        assert_eq!(
            failure.origin,
            FailureOrigin::Procedure {
                id,
                name: "Background".into()
            }
        );
        assert!(failure.message.contains("disk on fire"));
    }

    #[tokio::test]
    async fn snapshot_serializes() {
        let mut procedure = Procedure::new("Snap");
        procedure.add_step(Idle).unwrap();
        procedure.add_step(Quick).unwrap();
        procedure.start().await.unwrap();

        let snapshot = procedure.snapshot();
        assert_eq!(snapshot.steps, vec!["Idle", "Quick"]);
        assert_eq!(snapshot.progress, 0.5);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: ProcedureSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);
    }
}
