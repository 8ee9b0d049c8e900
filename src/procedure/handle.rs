//! Cloneable, non-owning handle on a procedure.

use super::ProcedureStatus;
use crate::core::State;
use crate::machine::StateKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Unique identity of one procedure instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcedureId(Uuid);

impl ProcedureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcedureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A transition request, applied by the procedure between transitions in
/// the order it was queued.
///
/// `from` is the step that issued the request, or `None` for requests from
/// outside the procedure. It is only used for logging: a request always
/// acts on whichever step is current when it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Next { from: Option<StateKey> },
    Goto { from: Option<StateKey>, target: StateKey },
    Abort { from: Option<StateKey> },
}

impl Command {
    pub(crate) fn origin(&self) -> Option<StateKey> {
        match *self {
            Self::Next { from } | Self::Goto { from, .. } | Self::Abort { from } => from,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) status: watch::Sender<ProcedureStatus>,
    pub(crate) changing: AtomicBool,
}

/// Handle on a procedure that steps, observers and the registry hold.
///
/// It does not keep the procedure alive: requests are queued and only take
/// effect while the procedure is being driven.
#[derive(Clone)]
pub struct ProcedureHandle {
    id: ProcedureId,
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    pub(crate) shared: Arc<Shared>,
}

impl ProcedureHandle {
    pub(crate) fn new(name: &str) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ProcedureStatus::NotStarted);
        let handle = Self {
            id: ProcedureId::new(),
            name: Arc::from(name),
            commands,
            shared: Arc::new(Shared {
                status,
                changing: AtomicBool::new(false),
            }),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ProcedureId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProcedureStatus {
        self.shared.status.borrow().clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.status.borrow().is_final()
    }

    /// Whether a step transition is in flight right now.
    pub fn is_changing_step(&self) -> bool {
        self.shared.changing.load(Ordering::Acquire)
    }

    /// Watch status changes. The receiver sees the current status first.
    pub fn subscribe(&self) -> watch::Receiver<ProcedureStatus> {
        self.shared.status.subscribe()
    }

    /// Resolve once the procedure is `Finished` or `Aborted`.
    pub async fn wait_terminal(&self) -> ProcedureStatus {
        let mut rx = self.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_final() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Ask the procedure to advance to the next step.
    pub fn request_next(&self) {
        self.send(Command::Next { from: None });
    }

    /// Ask the procedure to jump to step `T`.
    pub fn request_goto<T: 'static>(&self) {
        self.send(Command::Goto {
            from: None,
            target: StateKey::of::<T>(),
        });
    }

    /// Ask the procedure to abort.
    pub fn request_abort(&self) {
        self.send(Command::Abort { from: None });
    }

    pub(crate) fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(procedure = %self.name, ?command, "procedure dropped; request ignored");
        }
    }

    pub(crate) fn set_changing(&self, changing: bool) {
        self.shared.changing.store(changing, Ordering::Release);
    }

    pub(crate) fn publish(&self, status: ProcedureStatus) {
        self.shared.status.send_replace(status);
    }
}

impl fmt::Debug for ProcedureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &*self.shared.status.borrow())
            .finish()
    }
}
