//! Stagehand: an embeddable core for step-sequenced pipelines.
//!
//! Stagehand provides the orchestration pieces a host application wires
//! together, with no global state:
//!
//! - **Machine**: an async finite-state machine with typed state identities
//!   and a shared blackboard ([`machine`])
//! - **Procedure**: ordered steps on top of a machine with finish, goto and
//!   abort semantics ([`procedure`])
//! - **Event bus**: integer-keyed publish/subscribe with immediate,
//!   next-tick and delayed dispatch ([`event`])
//! - **Object pool**: checked get/put reuse of instances ([`pool`])
//!
//! The host drives time through a [`tick::TickDriver`] and can observe
//! fire-and-forget failures on a [`failure::FailureSink`].
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use stagehand::{Procedure, ProcedureOutcome, ProcedureStatus, StateError, Step, StepContext};
//!
//! struct LoadConfig;
//! struct LoadAssets;
//! struct RunMain;
//!
//! #[async_trait]
//! impl Step for LoadConfig {
//!     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
//!         cx.blackboard().write("config", &"release")?;
//!         cx.finish();
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl Step for LoadAssets {
//!     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
//!         cx.abort();
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl Step for RunMain {
//!     async fn activate(&mut self, cx: &mut StepContext<'_>) -> Result<(), StateError> {
//!         cx.finish();
//!         Ok(())
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut boot = Procedure::new("Boot");
//! boot.add_step(LoadConfig).unwrap();
//! boot.add_step(LoadAssets).unwrap();
//! boot.add_step(RunMain).unwrap();
//!
//! assert_eq!(boot.run().await.unwrap(), ProcedureOutcome::Aborted);
//! assert_eq!(boot.status(), ProcedureStatus::Aborted);
//! assert_eq!(boot.history().path(), vec!["LoadConfig", "LoadAssets"]);
//! # });
//! ```

pub mod config;
pub mod core;
pub mod event;
pub mod failure;
pub mod logging;
pub mod machine;
pub mod pool;
pub mod procedure;
pub mod tick;

// Re-export commonly used types
pub use config::{ConfigError, CoreConfig, PoolSettings};
pub use core::{State, TransitionHistory, TransitionRecord};
pub use event::{DispatchError, EventBus, EventId, EventParam, Listener, ListenerError};
pub use failure::{Failure, FailureOrigin, FailureSink};
pub use logging::{LogLevel, LogSettings};
pub use machine::{
    Blackboard, BlackboardError, MachineError, MachineState, StateError, StateKey, StateMachine,
};
pub use pool::{InvalidRelease, ObjectPool, Pooled, Reset};
pub use procedure::{
    BuildError, Procedure, ProcedureBuilder, ProcedureError, ProcedureHandle, ProcedureId,
    ProcedureOutcome, ProcedureRegistry, ProcedureSnapshot, ProcedureStatus, Step, StepContext,
};
pub use tick::{TickClock, TickDriver, TickInfo, Tickable};
