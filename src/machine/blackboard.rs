//! Per-machine key/value store shared by its states.

use super::error::BlackboardError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Typed key/value storage scoped to one state machine.
///
/// Values are stored as JSON so any serde type can be written and read
/// back, and so the whole board can be dumped for diagnostics. Only one
/// state runs at a time, so the board is accessed through `&mut` and needs
/// no locking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    entries: BTreeMap<String, Value>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn write<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), BlackboardError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| BlackboardError::Encode {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.entries.insert(key, value);
        Ok(())
    }

    /// Read a required entry. Fails with
    /// [`BlackboardError::MissingContext`] when `key` is unset.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<T, BlackboardError> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| BlackboardError::MissingContext(key.to_string()))?;
        decode(key, value.clone())
    }

    /// Read an optional entry, falling back to `default` when unset.
    pub fn read_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, BlackboardError> {
        match self.entries.get(key) {
            Some(value) => decode(key, value.clone()),
            None => Ok(default),
        }
    }

    /// Read a required entry and remove it.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<T, BlackboardError> {
        let value = self
            .entries
            .remove(key)
            .ok_or_else(|| BlackboardError::MissingContext(key.to_string()))?;
        decode(key, value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, BlackboardError> {
    serde_json::from_value(value).map_err(|e| BlackboardError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}
