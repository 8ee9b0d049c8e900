//! Asynchronous finite-state machine.
//!
//! A [`StateMachine`] owns a set of states keyed by their Rust type, at most
//! one of which is active. Transitions are strictly serialized: the previous
//! state's `deactivate` hook completes before the next state's `activate`
//! hook starts, and a machine refuses new transitions while one is in
//! flight.
//!
//! Each machine carries a [`Blackboard`] that its states share, and a
//! context value `C` handed to every hook. The procedure layer uses the
//! context to give steps a handle on their owning procedure; standalone
//! machines typically use `()`.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use stagehand::machine::{MachineState, Scope, StateError, StateKey, StateMachine};
//!
//! struct Idle;
//! struct Busy;
//!
//! #[async_trait]
//! impl MachineState<()> for Idle {
//!     async fn activate(&mut self, scope: Scope<'_, ()>) -> Result<(), StateError> {
//!         scope.blackboard.write("entered", &"idle")?;
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl MachineState<()> for Busy {
//!     async fn activate(&mut self, scope: Scope<'_, ()>) -> Result<(), StateError> {
//!         scope.blackboard.write("entered", &"busy")?;
//!         Ok(())
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut machine = StateMachine::new();
//! machine.add_state(Idle, true).unwrap();
//! machine.add_state(Busy, false).unwrap();
//!
//! machine.start().await.unwrap();
//! machine.change_state(StateKey::of::<Busy>()).await.unwrap();
//!
//! assert!(machine.is_in::<Busy>());
//! assert_eq!(machine.blackboard().read::<String>("entered").unwrap(), "busy");
//! # });
//! ```

mod blackboard;
mod error;

pub use blackboard::Blackboard;
pub use error::{BlackboardError, HookPhase, MachineError, StateError};

use crate::core::{TransitionHistory, TransitionRecord};
use crate::logging;
use async_trait::async_trait;
use chrono::Utc;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a state: its Rust type.
///
/// Equality and hashing use only the type id; the name is the unqualified
/// type name, kept for logs and errors.
#[derive(Clone, Copy)]
pub struct StateKey {
    type_id: TypeId,
    name: &'static str,
}

impl StateKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: short_type_name(type_name::<T>()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for StateKey {}

impl Hash for StateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateKey({})", self.name)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What a hook can see while it runs.
pub struct Scope<'a, C> {
    /// Identity of the state whose hook is running.
    pub key: StateKey,
    pub blackboard: &'a mut Blackboard,
    pub context: &'a C,
}

/// Behaviour of one state.
///
/// `init` runs once when the state is registered. `activate` and
/// `deactivate` run every time the state is entered and left; the same
/// instance is reused across visits.
#[async_trait]
pub trait MachineState<C: Sync>: Send {
    fn init(&mut self, _scope: Scope<'_, C>) -> Result<(), StateError> {
        Ok(())
    }

    async fn activate(&mut self, scope: Scope<'_, C>) -> Result<(), StateError>;

    async fn deactivate(&mut self, _scope: Scope<'_, C>) -> Result<(), StateError> {
        Ok(())
    }
}

/// A set of states, at most one active, plus a shared blackboard.
pub struct StateMachine<C: Sync = ()> {
    context: C,
    states: HashMap<StateKey, Box<dyn MachineState<C>>>,
    order: Vec<StateKey>,
    initial: Option<StateKey>,
    current: Option<StateKey>,
    changing: bool,
    blackboard: Blackboard,
    history: TransitionHistory,
}

impl StateMachine<()> {
    pub fn new() -> Self {
        Self::with_context(())
    }
}

impl Default for StateMachine<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> StateMachine<C> {
    /// Create a machine whose hooks all receive `context`.
    pub fn with_context(context: C) -> Self {
        Self {
            context,
            states: HashMap::new(),
            order: Vec::new(),
            initial: None,
            current: None,
            changing: false,
            blackboard: Blackboard::new(),
            history: TransitionHistory::new(),
        }
    }

    /// Register `state` under its own type and run its `init` hook.
    pub fn add_state<S>(&mut self, state: S, is_initial: bool) -> Result<(), MachineError>
    where
        S: MachineState<C> + 'static,
    {
        self.register(StateKey::of::<S>(), Box::new(state), is_initial)
    }

    /// Register a boxed state under an explicit key and run its `init`
    /// hook.
    ///
    /// Fails with [`MachineError::DuplicateState`] if `key` is taken and
    /// with [`MachineError::DuplicateInitial`] if another initial state is
    /// already set. Nothing is registered on failure.
    pub fn register(
        &mut self,
        key: StateKey,
        mut state: Box<dyn MachineState<C>>,
        is_initial: bool,
    ) -> Result<(), MachineError> {
        if self.states.contains_key(&key) {
            return Err(MachineError::DuplicateState(key.name()));
        }
        if is_initial {
            if let Some(existing) = self.initial {
                return Err(MachineError::DuplicateInitial {
                    existing: existing.name(),
                    new: key.name(),
                });
            }
        }

        let scope = Scope {
            key,
            blackboard: &mut self.blackboard,
            context: &self.context,
        };
        state.init(scope).map_err(|source| MachineError::Hook {
            state: key.name(),
            phase: HookPhase::Init,
            source,
        })?;

        if is_initial {
            self.initial = Some(key);
        }
        self.states.insert(key, state);
        self.order.push(key);
        tracing::debug!(state = %key, initial = is_initial, "state registered");
        Ok(())
    }

    /// Activate the initial state.
    pub async fn start(&mut self) -> Result<(), MachineError> {
        if let Some(current) = self.current {
            return Err(MachineError::AlreadyStarted(current.name()));
        }
        let initial = self.initial.ok_or(MachineError::NotConfigured)?;
        self.change_state(initial).await
    }

    /// Leave the current state (if any) and enter `target`.
    ///
    /// The current state's `deactivate` is awaited before `target`'s
    /// `activate` starts. A failing `deactivate` is logged and the
    /// transition proceeds; a failing `activate` is returned as
    /// [`MachineError::Hook`] with `target` left as the current state.
    /// Re-entering the current state runs both hooks on it.
    ///
    /// If a previous call was cancelled mid-transition the machine stays
    /// marked as changing and refuses further transitions with
    /// [`MachineError::TransitionInFlight`].
    pub async fn change_state(&mut self, target: StateKey) -> Result<(), MachineError> {
        if self.changing {
            return Err(MachineError::TransitionInFlight {
                target: target.name(),
            });
        }
        if !self.states.contains_key(&target) {
            tracing::error!(state = %target, "change to unregistered state");
            return Err(MachineError::UnknownState(target.name()));
        }

        self.changing = true;
        let from = self.current.take();

        if let Some(from) = from {
            self.deactivate(from).await;
        }

        self.current = Some(target);
        let visit = self.history.visits(target.name()) + 1;
        self.history.record(TransitionRecord {
            from: from.map(|k| k.name().to_string()),
            to: target.name().to_string(),
            timestamp: Utc::now(),
            visit,
        });
        tracing::info!(
            from = from.map(|k| k.name()).unwrap_or("<none>"),
            to = %target,
            "state change"
        );

        let result = match self.states.get_mut(&target) {
            Some(state) => {
                let scope = Scope {
                    key: target,
                    blackboard: &mut self.blackboard,
                    context: &self.context,
                };
                state.activate(scope).await
            }
            None => Ok(()),
        };
        self.changing = false;

        result.map_err(|source| MachineError::Hook {
            state: target.name(),
            phase: HookPhase::Activate,
            source,
        })
    }

    /// Deactivate the current state and leave the machine with no active
    /// state. A no-op when nothing is active.
    pub async fn stop(&mut self) -> Result<(), MachineError> {
        if self.changing {
            let target = self.current.map(|k| k.name()).unwrap_or("<none>");
            return Err(MachineError::TransitionInFlight { target });
        }
        let Some(current) = self.current.take() else {
            return Ok(());
        };

        self.changing = true;
        self.deactivate(current).await;
        self.changing = false;
        tracing::info!(state = %current, "machine stopped");
        Ok(())
    }

    async fn deactivate(&mut self, key: StateKey) {
        let Some(state) = self.states.get_mut(&key) else {
            logging::check(false, format!("active state '{key}' is not registered"));
            return;
        };
        let scope = Scope {
            key,
            blackboard: &mut self.blackboard,
            context: &self.context,
        };
        if let Err(e) = state.deactivate(scope).await {
            tracing::warn!(state = %key, error = %e, "deactivate hook failed; continuing transition");
        }
    }

    pub fn current(&self) -> Option<StateKey> {
        self.current
    }

    pub fn is_in<S: 'static>(&self) -> bool {
        self.current == Some(StateKey::of::<S>())
    }

    /// Whether a transition is currently in flight.
    pub fn is_changing(&self) -> bool {
        self.changing
    }

    pub fn contains(&self, key: StateKey) -> bool {
        self.states.contains_key(&key)
    }

    /// Registered state keys in registration order.
    pub fn states(&self) -> &[StateKey] {
        &self.order
    }

    pub fn initial(&self) -> Option<StateKey> {
        self.initial
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn history(&self) -> &TransitionHistory {
        &self.history
    }
}

impl<C: Sync> fmt::Debug for StateMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.order)
            .field("initial", &self.initial)
            .field("current", &self.current)
            .field("changing", &self.changing)
            .finish_non_exhaustive()
    }
}
