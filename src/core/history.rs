//! Record of state activations over time.
//!
//! Every time a machine activates a state it appends a
//! [`TransitionRecord`]. The history is diagnostic only: nothing in the
//! crate makes decisions based on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One activation: the state that was left (if any) and the state entered.
///
/// # Example
///
/// ```rust
/// use stagehand::core::TransitionRecord;
/// use chrono::Utc;
///
/// let record = TransitionRecord {
///     from: Some("LoadConfig".to_string()),
///     to: "LoadAssets".to_string(),
///     timestamp: Utc::now(),
///     visit: 1,
/// };
/// assert_eq!(record.visit, 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state deactivated by this transition, `None` on start.
    pub from: Option<String>,
    /// The state activated by this transition.
    pub to: String,
    /// When the target state was activated.
    pub timestamp: DateTime<Utc>,
    /// How many times `to` has been entered, this visit included.
    pub visit: usize,
}

/// Ordered list of activations.
///
/// # Example
///
/// ```rust
/// use stagehand::core::{TransitionHistory, TransitionRecord};
/// use chrono::Utc;
///
/// let mut history = TransitionHistory::new();
/// history.record(TransitionRecord {
///     from: None,
///     to: "Start".to_string(),
///     timestamp: Utc::now(),
///     visit: 1,
/// });
/// history.record(TransitionRecord {
///     from: Some("Start".to_string()),
///     to: "End".to_string(),
///     timestamp: Utc::now(),
///     visit: 1,
/// });
///
/// assert_eq!(history.path(), vec!["Start", "End"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionHistory {
    transitions: Vec<TransitionRecord>,
}

impl TransitionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&mut self, transition: TransitionRecord) {
        self.transitions.push(transition);
    }

    /// Names of the states visited, in order.
    ///
    /// Starts with the `from` state of the first record when the history
    /// does not begin at machine start.
    pub fn path(&self) -> Vec<&str> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(from) = self.transitions.first().and_then(|t| t.from.as_deref()) {
            path.push(from);
        }
        path.extend(self.transitions.iter().map(|t| t.to.as_str()));
        path
    }

    /// Time between the first and last recorded activation, `None` when
    /// empty.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.transitions.first()?, self.transitions.last()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    /// Number of times `state` was entered.
    pub fn visits(&self, state: &str) -> usize {
        self.transitions.iter().filter(|t| t.to == state).count()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}
