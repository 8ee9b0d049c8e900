//! Value-typed lifecycle states.
//!
//! A [`State`] is a plain value describing where something is in its
//! lifecycle, for example a procedure's status. It carries no behaviour of
//! its own; behaviour lives in [`MachineState`](crate::machine::MachineState)
//! implementations.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for lifecycle status values.
///
/// All methods are pure. Implementors are cheap to clone and serializable
/// so they can be published on watch channels and included in snapshots.
///
/// # Example
///
/// ```rust
/// use stagehand::core::State;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// enum Download {
///     Queued,
///     Fetching,
///     Done,
///     Failed,
/// }
///
/// impl State for Download {
///     fn name(&self) -> &str {
///         match self {
///             Self::Queued => "Queued",
///             Self::Fetching => "Fetching",
///             Self::Done => "Done",
///             Self::Failed => "Failed",
///         }
///     }
///
///     fn is_final(&self) -> bool {
///         matches!(self, Self::Done | Self::Failed)
///     }
///
///     fn is_error(&self) -> bool {
///         matches!(self, Self::Failed)
///     }
/// }
///
/// assert!(Download::Failed.is_final());
/// assert!(!Download::Fetching.is_error());
/// ```
pub trait State:
    Clone + PartialEq + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync
{
    /// Name for display and logging.
    fn name(&self) -> &str;

    /// Whether nothing can follow this state.
    ///
    /// Default implementation returns `false`.
    fn is_final(&self) -> bool {
        false
    }

    /// Whether this state represents a failure. Error states are usually
    /// final as well, but this is not enforced.
    ///
    /// Default implementation returns `false`.
    fn is_error(&self) -> bool {
        false
    }
}
