//! Lookup table of live procedures.

use super::handle::{ProcedureHandle, ProcedureId};
use super::ProcedureStatus;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared map from procedure id to handle.
///
/// Cloning yields another view of the same table. Handles do not keep
/// procedures alive, so entries for dropped or terminated procedures stay
/// until [`prune_terminal`](Self::prune_terminal) or
/// [`remove`](Self::remove) is called.
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    handles: Arc<Mutex<BTreeMap<ProcedureId, ProcedureHandle>>>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handles(&self) -> MutexGuard<'_, BTreeMap<ProcedureId, ProcedureHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `handle`. Registering the same procedure twice keeps one entry.
    pub fn register(&self, handle: ProcedureHandle) {
        tracing::debug!(procedure = handle.name(), id = %handle.id(), "procedure registered");
        self.handles().insert(handle.id(), handle);
    }

    pub fn remove(&self, id: ProcedureId) -> Option<ProcedureHandle> {
        self.handles().remove(&id)
    }

    pub fn get(&self, id: ProcedureId) -> Option<ProcedureHandle> {
        self.handles().get(&id).cloned()
    }

    /// First registered procedure with `name`.
    pub fn find(&self, name: &str) -> Option<ProcedureHandle> {
        self.handles().values().find(|h| h.name() == name).cloned()
    }

    /// Procedures currently between start and finish.
    pub fn running(&self) -> Vec<ProcedureHandle> {
        self.handles()
            .values()
            .filter(|h| matches!(h.status(), ProcedureStatus::Running { .. }))
            .cloned()
            .collect()
    }

    /// Forget every finished or aborted procedure; returns how many were
    /// removed.
    pub fn prune_terminal(&self) -> usize {
        let mut handles = self.handles();
        let before = handles.len();
        handles.retain(|_, h| !h.is_terminal());
        before - handles.len()
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// One line per procedure: name, id and status.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for handle in self.handles().values() {
            let _ = writeln!(
                out,
                "{} [{}] {}{}",
                handle.name(),
                handle.id(),
                handle.status(),
                if handle.is_changing_step() {
                    " (changing step)"
                } else {
                    ""
                }
            );
        }
        out
    }
}

impl std::fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StateError;
    use crate::procedure::{Procedure, Step, StepContext};
    use async_trait::async_trait;

    struct Wait;
    struct Done;

    #[async_trait]
    impl Step for Wait {
        async fn activate(&mut self, _cx: &mut StepContext<'_>) -> Result<(), StateError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Step for Done {
        async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
            cx.finish();
            Ok(())
        }
    }

    fn procedure(name: &str, step: impl Step) -> Procedure {
        let mut procedure = Procedure::new(name);
        procedure.add_step(step).unwrap();
        procedure
    }

    #[tokio::test]
    async fn tracks_running_and_prunes_terminal() {
        let registry = ProcedureRegistry::new();
        let mut waiting = procedure("Waiting", Wait);
        let mut quick = procedure("Quick", Done);
        let idle = procedure("Idle", Wait);
        registry.register(waiting.handle());
        registry.register(quick.handle());
        registry.register(idle.handle());

        waiting.start().await.unwrap();
        quick.run().await.unwrap();

        let running: Vec<String> = registry
            .running()
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(running, vec!["Waiting"]);

        assert_eq!(registry.prune_terminal(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(quick.id()).is_none());
        assert!(registry.find("Idle").is_some());
    }

    #[test]
    fn register_is_idempotent_per_procedure() {
        let registry = ProcedureRegistry::new();
        let p = procedure("Once", Wait);
        registry.register(p.handle());
        registry.register(p.handle());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.remove(p.id()).map(|h| h.id()), Some(p.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dump_shows_status() {
        let registry = ProcedureRegistry::new();
        let mut p = procedure("Shown", Wait);
        registry.register(p.handle());
        p.start().await.unwrap();

        let dump = registry.dump();
        assert!(dump.starts_with("Shown ["));
        assert!(dump.contains("Running(0: Wait)"));
    }
}
