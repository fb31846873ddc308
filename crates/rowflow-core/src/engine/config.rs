//! Engine configuration.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::config::{DEFAULT_POLL_INTERVAL, DEFAULT_ROW_SET_SIZE};
use crate::channel::{ChannelConfig, ChannelKind};

/// Default host name used for partition distribution lookups.
pub const DEFAULT_HOST: &str = "local";

/// Default prefix of engine thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "rowflow";

/// How stage copies are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One thread per stage copy over bounded blocking channels.
    #[default]
    Threaded,
    /// One thread calling every copy once per round over single-slot
    /// channels.
    Serial,
    /// One caller-driven scheduler over unbounded non-blocking channels.
    Cooperative,
}

impl ExecutionMode {
    /// Channel flavor used by the mode.
    #[must_use]
    pub fn channel_kind(self) -> ChannelKind {
        match self {
            Self::Threaded => ChannelKind::Blocking,
            Self::Serial => ChannelKind::Handoff,
            Self::Cooperative => ChannelKind::Queue,
        }
    }

    /// Returns true if row reads and writes may block.
    #[must_use]
    pub fn blocking_io(self) -> bool {
        matches!(self, Self::Threaded)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Threaded => "threaded",
            Self::Serial => "serial",
            Self::Cooperative => "cooperative",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threaded" => Ok(Self::Threaded),
            "serial" => Ok(Self::Serial),
            "cooperative" => Ok(Self::Cooperative),
            other => Err(ConfigError::Invalid(format!("unknown execution mode '{other}'"))),
        }
    }
}

/// Errors raised while loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON is malformed or has unknown fields.
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings of one engine.
///
/// Loaded from JSON; missing fields take their defaults.
///
/// ```json
/// { "row_set_size": 5000, "execution_mode": "serial", "poll_interval_ms": 10 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Capacity of bounded channels.
    pub row_set_size: usize,

    /// Scheduling model.
    pub execution_mode: ExecutionMode,

    /// Stop and pause checks happen at least this often, in milliseconds.
    pub poll_interval_ms: u64,

    /// Host name used to look up partition distributions.
    pub host: String,

    /// Prefix of engine thread names.
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            row_set_size: DEFAULT_ROW_SET_SIZE,
            execution_mode: ExecutionMode::default(),
            poll_interval_ms: duration_millis(DEFAULT_POLL_INTERVAL),
            host: DEFAULT_HOST.to_string(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl EngineConfig {
    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, or the errors
    /// of [`EngineConfig::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a zero `row_set_size` or
    /// `poll_interval_ms`, or an empty `host`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.row_set_size == 0 {
            return Err(ConfigError::Invalid("row_set_size must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        Ok(())
    }

    /// Stop-check granularity.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Channel settings derived from this configuration.
    #[must_use]
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::builder()
            .capacity(self.row_set_size)
            .poll_interval(self.poll_interval())
            .build()
    }
}

/// Builder for `EngineConfig`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    row_set_size: Option<usize>,
    execution_mode: Option<ExecutionMode>,
    poll_interval: Option<Duration>,
    host: Option<String>,
    thread_name_prefix: Option<String>,
}

impl EngineConfigBuilder {
    /// Sets the channel capacity.
    #[must_use]
    pub fn row_set_size(mut self, size: usize) -> Self {
        self.row_set_size = Some(size);
        self
    }

    /// Sets the scheduling model.
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Sets the stop-check granularity.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Sets the host name.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            row_set_size: self.row_set_size.unwrap_or(defaults.row_set_size).max(1),
            execution_mode: self.execution_mode.unwrap_or_default(),
            poll_interval_ms: self
                .poll_interval
                .map_or(defaults.poll_interval_ms, duration_millis)
                .max(1),
            host: self.host.unwrap_or(defaults.host),
            thread_name_prefix: self
                .thread_name_prefix
                .unwrap_or(defaults.thread_name_prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.row_set_size, 10_000);
        assert_eq!(config.execution_mode, ExecutionMode::Threaded);
        assert_eq!(config.channel_config().capacity, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .row_set_size(0)
            .execution_mode(ExecutionMode::Serial)
            .poll_interval(Duration::from_micros(10))
            .host("node-2")
            .build();
        assert_eq!(config.row_set_size, 1);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.host, "node-2");
        assert_eq!(config.execution_mode.channel_kind(), ChannelKind::Handoff);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"execution_mode": "cooperative", "row_set_size": 5}"#)
                .unwrap();
        assert_eq!(config.execution_mode, ExecutionMode::Cooperative);
        assert_eq!(config.row_set_size, 5);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"row_set_size": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"rowsetsize": 3}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"host": "edge", "poll_interval_ms": 5}}"#).unwrap();
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.host, "edge");
        assert_eq!(config.poll_interval(), Duration::from_millis(5));

        assert!(matches!(
            EngineConfig::from_path(file.path().with_extension("missing")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Serial".parse::<ExecutionMode>().unwrap(), ExecutionMode::Serial);
        assert!("warp".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::Cooperative.to_string(), "cooperative");
        assert!(ExecutionMode::Threaded.blocking_io());
        assert!(!ExecutionMode::Serial.blocking_io());
    }
}
