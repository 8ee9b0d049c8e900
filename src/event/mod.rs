//! Publish/subscribe event bus.
//!
//! Events are identified by plain integers chosen by the host. Listeners
//! are `Arc`-wrapped closures registered per event id with set semantics.
//! An event can be dispatched immediately, on the next tick, or after a
//! logical delay; parameters are any [`Reset`](crate::pool::Reset) type and
//! can be recycled through the bus's per-type cache.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use stagehand::event::{expect_param, listener, EventBus, IntParam};
//! use stagehand::failure::FailureSink;
//! use stagehand::tick::TickDriver;
//!
//! const SCORE_CHANGED: i32 = 10;
//!
//! let mut driver = TickDriver::new();
//! let bus = Arc::new(EventBus::new(driver.clock(), FailureSink::new()));
//! driver.register(&bus);
//!
//! let on_score = listener(|_, param| {
//!     let score = expect_param::<IntParam>(param)?;
//!     println!("score is now {}", score.value);
//!     Ok(())
//! });
//! bus.add_listener(SCORE_CHANGED, &on_score);
//!
//! bus.fire_event(SCORE_CHANGED, Some(&IntParam::new(3))).unwrap();
//! bus.fire_event_delay(SCORE_CHANGED, Some(Box::new(IntParam::new(4))), Duration::from_secs(1));
//! driver.tick(Duration::from_secs(1));
//! assert_eq!(bus.pending_count(), 0);
//! ```

mod bus;
mod error;
mod param;

pub use bus::{listener, EventBus, Listener};
pub use error::{DispatchError, ListenerError};
pub use param::{
    expect_param, AsAny, BoolParam, EventParam, FloatParam, IntParam, ParamCache, StringParam,
    Value,
};

/// Host-chosen identifier of an event.
pub type EventId = i32;
