//! Host-facing configuration.
//!
//! Everything has a default, so an empty JSON object is a valid
//! configuration. Validation reports every problem at once rather than
//! stopping at the first one.

use crate::logging::LogSettings;
use serde::{Deserialize, Serialize};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

const DEFAULT_POOL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("pool initial_capacity must be at least 1")]
    ZeroPoolCapacity,

    #[error("log override has an empty tag")]
    EmptyLogTag,

    #[error("log override tag '{0}' contains whitespace or ','")]
    InvalidLogTag(String),

    #[error("configuration has {} problem(s): {}", .0.len(), join(.0))]
    Invalid(Vec<ConfigError>),
}

fn join(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Sizing for object pools created from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub initial_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub logging: LogSettings,
    pub pool: PoolSettings,
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every setting, accumulating all problems found.
    pub fn validate(&self) -> Validation<(), NonEmptyVec<ConfigError>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<ConfigError>>> = Vec::new();

        checks.push(if self.pool.initial_capacity == 0 {
            Validation::fail(ConfigError::ZeroPoolCapacity)
        } else {
            Validation::success(())
        });

        for tag in self.logging.overrides.keys() {
            let check = if tag.is_empty() {
                Validation::fail(ConfigError::EmptyLogTag)
            } else if tag.contains(|c: char| c.is_whitespace() || c == ',') {
                Validation::fail(ConfigError::InvalidLogTag(tag.clone()))
            } else {
                Validation::success(())
            };
            checks.push(check);
        }

        Validation::all_vec(checks).map(|_| ())
    }

    /// [`validate`](Self::validate) folded into a `Result`.
    pub fn check(&self) -> Result<(), ConfigError> {
        match self.validate() {
            Validation::Success(_) => Ok(()),
            Validation::Failure(errors) => {
                Err(ConfigError::Invalid(errors.iter().cloned().collect()))
            }
        }
    }
}
