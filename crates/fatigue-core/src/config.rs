//! Configuration loading and typed config structures.
//!
//! The configuration lives in `fatigue-config.yaml` next to the host
//! binary. Every field has a default, so an empty or partial file is valid.
//! The level constants (`SECONDS_PER_LEVEL`, `LEVELS`) are deliberately
//! not configurable: they define the meaning of the persisted data.
//!
//! ```yaml
//! engine:
//!   sweep_interval_secs: 300
//!   autosave_interval_secs: 600
//!   consumers: [display, gather]
//! retry:
//!   delivery: { interval_ms: 1000, max_attempts: 5 }
//!   death_settle: { interval_ms: 200, max_attempts: 10 }
//!   connect_load: { interval_ms: 500, max_attempts: 20 }
//! storage:
//!   data_file: data/Fatigue.json
//! logging:
//!   level: info
//!   json: false
//! ```

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FatigueConfig {
    /// Engine scheduling settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Bounded retry policies.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data file location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FatigueConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `FATIGUE_DATA_FILE` overrides `storage.data_file`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml maps an empty document to unit, not to an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.storage.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine.sweep_interval_secs must be at least 1".to_owned(),
            });
        }
        for (name, secs) in [
            ("sweep_interval_secs", self.engine.sweep_interval_secs),
            ("autosave_interval_secs", self.engine.autosave_interval_secs),
        ] {
            if secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid {
                    reason: format!("engine.{name} must be at most {MAX_INTERVAL_SECS}"),
                });
            }
        }
        for (name, policy) in [
            ("delivery", &self.retry.delivery),
            ("death_settle", &self.retry.death_settle),
            ("connect_load", &self.retry.connect_load),
        ] {
            if policy.interval_ms == 0 || policy.max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "retry.{name} needs interval_ms and max_attempts of at least 1"
                    ),
                });
            }
            if policy.interval_ms > MAX_RETRY_INTERVAL_MS {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "retry.{name}.interval_ms must be at most {MAX_RETRY_INTERVAL_MS}"
                    ),
                });
            }
        }
        if self.storage.data_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "storage.data_file must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

/// Engine scheduling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Seconds between sweeps that re-service offline entities.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Seconds between periodic saves. Zero disables autosave; state is
    /// still saved on shutdown.
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    /// Names of the notification consumer slots.
    #[serde(default = "default_consumers")]
    pub consumers: Vec<String>,
}

impl EngineConfig {
    /// Sweep interval as a duration.
    ///
    /// Saturates at [`TimeDelta::MAX`] for values [`FatigueConfig::validate`]
    /// would reject.
    pub fn sweep_interval(&self) -> TimeDelta {
        seconds_delta(self.sweep_interval_secs)
    }

    /// Autosave interval as a duration, or `None` when disabled.
    pub fn autosave_interval(&self) -> Option<TimeDelta> {
        (self.autosave_interval_secs > 0).then(|| seconds_delta(self.autosave_interval_secs))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            autosave_interval_secs: default_autosave_interval_secs(),
            consumers: default_consumers(),
        }
    }
}

/// One bounded retry policy as written in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicyConfig {
    /// Milliseconds between attempts.
    pub interval_ms: u64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl RetryPolicyConfig {
    /// Convert into the runtime policy.
    pub fn policy(&self) -> RetryPolicy {
        let interval = i64::try_from(self.interval_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);
        RetryPolicy::new(interval, self.max_attempts)
    }
}

/// Retry policies for each deferred action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Delivering a notification to a consumer that is not attached yet.
    #[serde(default = "default_delivery_retry")]
    pub delivery: RetryPolicyConfig,

    /// Waiting for death state to settle before marking inactive.
    #[serde(default = "default_death_settle_retry")]
    pub death_settle: RetryPolicyConfig,

    /// Waiting for a newly connected entity to finish loading.
    #[serde(default = "default_connect_load_retry")]
    pub connect_load: RetryPolicyConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delivery: default_delivery_retry(),
            death_settle: default_death_settle_retry(),
            connect_load: default_connect_load_retry(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Path of the JSON data file.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl StorageConfig {
    /// Apply environment variable overrides.
    ///
    /// - `FATIGUE_DATA_FILE` overrides `data_file`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FATIGUE_DATA_FILE")
            && !path.trim().is_empty()
        {
            self.data_file = PathBuf::from(path);
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_sweep_interval_secs() -> u64 {
    300
}

const fn default_autosave_interval_secs() -> u64 {
    600
}

/// Longest accepted sweep or autosave interval: one year.
const MAX_INTERVAL_SECS: u64 = 31_536_000;

/// Longest accepted gap between retry checks: one hour.
const MAX_RETRY_INTERVAL_MS: u64 = 3_600_000;

fn seconds_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn default_consumers() -> Vec<String> {
    vec!["display".to_owned(), "gather".to_owned()]
}

const fn default_delivery_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        interval_ms: 1_000,
        max_attempts: 5,
    }
}

const fn default_death_settle_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        interval_ms: 200,
        max_attempts: 10,
    }
}

const fn default_connect_load_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        interval_ms: 500,
        max_attempts: 20,
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data").join("Fatigue.json")
}

fn default_log_level() -> String {
    "info".to_owned()
}
