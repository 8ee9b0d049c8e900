//! Plain data types shared by the machine and procedure layers.
//!
//! - The [`State`] trait for value-typed lifecycle states
//! - [`TransitionHistory`] for recording activations over time
//!
//! Nothing in this module performs I/O or awaits.

mod history;
mod state;

pub use history::{TransitionHistory, TransitionRecord};
pub use state::State;
