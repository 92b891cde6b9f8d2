//! Watcher configuration
//!
//! Can be built in code or loaded from a TOML file:
//!
//! ```toml
//! event_capacity = 128
//! error_capacity = 32
//! backend = "poll"
//! poll_interval_ms = 500
//! recursive = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_CAPACITY: usize = 1_000_000;
const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 3_600_000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Which notification mechanism backs a watcher built with `Watcher::new`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The OS-native mechanism for the target platform
    #[default]
    Recommended,
    /// Periodic metadata scanning
    Poll,
}

/// Watcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Outbound event buffer size (default: 128)
    ///
    /// When full, the delivery loop blocks until the consumer catches up.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Outbound error buffer size (default: 32)
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,

    /// Notification backend (default: recommended)
    #[serde(default)]
    pub backend: BackendKind,

    /// Scan interval for the poll backend (default: 1000ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Watch directories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            error_capacity: default_error_capacity(),
            backend: BackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            recursive: false,
        }
    }
}

impl WatcherConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every value is within its valid range
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("event_capacity", self.event_capacity as u64, 1, MAX_CAPACITY as u64)?;
        check_range("error_capacity", self.error_capacity as u64, 1, MAX_CAPACITY as u64)?;
        check_range(
            "poll_interval_ms",
            self.poll_interval_ms,
            MIN_POLL_INTERVAL_MS,
            MAX_POLL_INTERVAL_MS,
        )?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn default_event_capacity() -> usize {
    128
}

fn default_error_capacity() -> usize {
    32
}

fn default_poll_interval_ms() -> u64 {
    1000
}
