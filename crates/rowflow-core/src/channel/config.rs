//! Channel configuration.

use std::time::Duration;

/// Default number of rows a channel buffers before producers block.
pub const DEFAULT_ROW_SET_SIZE: usize = 10_000;

/// Minimum channel capacity.
pub const MIN_ROW_SET_SIZE: usize = 1;

/// Maximum channel capacity (prevent excessive memory usage).
pub const MAX_ROW_SET_SIZE: usize = 1 << 22;

/// Default interval at which blocked channel operations re-check the stop signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration shared by every channel of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Capacity of bounded channels.
    pub capacity: usize,

    /// Granularity of stop checks while blocked in `put` or `get`.
    pub poll_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ROW_SET_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(MIN_ROW_SET_SIZE, MAX_ROW_SET_SIZE),
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }
}

/// Builder for `ChannelConfig`.
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    capacity: Option<usize>,
    poll_interval: Option<Duration>,
}

impl ChannelConfigBuilder {
    /// Sets the channel capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the stop-check interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChannelConfig {
        ChannelConfig {
            capacity: self
                .capacity
                .unwrap_or(DEFAULT_ROW_SET_SIZE)
                .clamp(MIN_ROW_SET_SIZE, MAX_ROW_SET_SIZE),
            poll_interval: self
                .poll_interval
                .unwrap_or(DEFAULT_POLL_INTERVAL)
                .max(Duration::from_millis(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.capacity, DEFAULT_ROW_SET_SIZE);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(ChannelConfig::with_capacity(0).capacity, MIN_ROW_SET_SIZE);
        assert_eq!(
            ChannelConfig::builder().capacity(usize::MAX).build().capacity,
            MAX_ROW_SET_SIZE
        );
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::builder()
            .capacity(16)
            .poll_interval(Duration::ZERO)
            .build();
        assert_eq!(config.capacity, 16);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
    }
}
