//! Logging levels, per-tag overrides and subscriber setup.
//!
//! The crate logs through `tracing`. A *tag* is a tracing target such as
//! `stagehand::procedure`; hosts can raise or lower the minimum level for a
//! single tag without touching the global level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Severity levels understood by the logging sink, in increasing order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    /// Failed internal assertions. Logged at error severity.
    Assert,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Assert => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Assert => "Assert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("a global subscriber is already installed")]
    AlreadyInstalled,
}

/// Minimum level plus per-tag overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub min_level: LogLevel,
    pub overrides: BTreeMap<String, LogLevel>,
}

impl LogSettings {
    /// Give `tag` its own minimum level, taking priority over `min_level`.
    pub fn override_tag(mut self, tag: impl Into<String>, level: LogLevel) -> Self {
        self.overrides.insert(tag.into(), level);
        self
    }

    /// Render the settings as `EnvFilter` directives.
    pub fn directives(&self) -> String {
        let mut parts = vec![self.min_level.directive().to_string()];
        parts.extend(
            self.overrides
                .iter()
                .map(|(tag, level)| format!("{tag}={}", level.directive())),
        );
        parts.join(",")
    }

    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        Ok(EnvFilter::try_new(self.directives())?)
    }

    /// Install a formatting subscriber for the whole process.
    pub fn init(&self) -> Result<(), LoggingError> {
        tracing_subscriber::fmt()
            .with_env_filter(self.filter()?)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInstalled)
    }
}

/// Log `message` as a failed assertion when `condition` is false.
///
/// Returns `condition` so callers can branch on it.
pub fn check(condition: bool, message: impl fmt::Display) -> bool {
    if !condition {
        tracing::error!(level = %LogLevel::Assert, "[ASSERT] {message}");
    }
    condition
}
