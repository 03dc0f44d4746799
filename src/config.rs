//! Terminal configuration.
//!
//! Timing parameters and bounds for the link session live here so they can be
//! tuned in one place.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default interval between RSSI reads while connected.
pub const DEFAULT_RSSI_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default maximum number of entries kept in the message log.
pub const DEFAULT_MESSAGE_LOG_CAPACITY: usize = 500;

/// Default number of oldest entries evicted at once when the log overflows.
pub const DEFAULT_MESSAGE_EVICTION_BATCH: usize = 100;

/// Default maximum number of sent commands kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default RSSI change (dBm) a repeat sighting must exceed to update a device.
pub const DEFAULT_RSSI_UPDATE_THRESHOLD: i16 = 5;

/// Configuration for a [`Terminal`](crate::Terminal) and its link session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TerminalConfig {
    /// Interval between RSSI reads while connected.
    pub rssi_poll_interval: Duration,

    /// Maximum number of message log entries.
    pub message_log_capacity: usize,

    /// Number of oldest entries dropped when the capacity is exceeded.
    pub message_eviction_batch: usize,

    /// Maximum number of command history entries.
    pub history_capacity: usize,

    /// Repeat sightings only update a device when the RSSI moved by more than this.
    pub rssi_update_threshold: i16,

    /// Below this many devices the registry re-sorts on every insertion.
    pub registry_eager_sort_limit: usize,

    /// Above the eager limit, the registry re-sorts every this many devices.
    pub registry_sort_stride: usize,

    /// Maximum number of queued transport events applied before a snapshot is published.
    pub event_batch_limit: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            rssi_poll_interval: DEFAULT_RSSI_POLL_INTERVAL,
            message_log_capacity: DEFAULT_MESSAGE_LOG_CAPACITY,
            message_eviction_batch: DEFAULT_MESSAGE_EVICTION_BATCH,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            rssi_update_threshold: DEFAULT_RSSI_UPDATE_THRESHOLD,
            registry_eager_sort_limit: 20,
            registry_sort_stride: 5,
            event_batch_limit: 64,
        }
    }
}

impl TerminalConfig {
    /// Set the RSSI polling interval.
    pub fn with_rssi_poll_interval(mut self, interval: Duration) -> Self {
        self.rssi_poll_interval = interval;
        self
    }

    /// Set the message log bounds.
    pub fn with_message_log_bounds(mut self, capacity: usize, eviction_batch: usize) -> Self {
        self.message_log_capacity = capacity;
        self.message_eviction_batch = eviction_batch;
        self
    }

    /// Set the command history capacity.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the RSSI update threshold for repeat sightings.
    pub fn with_rssi_update_threshold(mut self, threshold: i16) -> Self {
        self.rssi_update_threshold = threshold;
        self
    }

    /// Set the registry re-sort throttle.
    pub fn with_registry_sort_throttle(mut self, eager_limit: usize, stride: usize) -> Self {
        self.registry_eager_sort_limit = eager_limit;
        self.registry_sort_stride = stride;
        self
    }

    /// Set the event batch limit.
    pub fn with_event_batch_limit(mut self, limit: usize) -> Self {
        self.event_batch_limit = limit;
        self
    }

    /// Check the configuration for values the session cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.rssi_poll_interval.is_zero() {
            return Err(invalid("rssi_poll_interval", &self.rssi_poll_interval));
        }
        if self.message_log_capacity == 0 {
            return Err(invalid("message_log_capacity", &self.message_log_capacity));
        }
        if self.message_eviction_batch == 0
            || self.message_eviction_batch > self.message_log_capacity
        {
            return Err(invalid(
                "message_eviction_batch",
                &self.message_eviction_batch,
            ));
        }
        if self.history_capacity == 0 {
            return Err(invalid("history_capacity", &self.history_capacity));
        }
        if self.rssi_update_threshold < 0 {
            return Err(invalid("rssi_update_threshold", &self.rssi_update_threshold));
        }
        if self.registry_sort_stride == 0 {
            return Err(invalid("registry_sort_stride", &self.registry_sort_stride));
        }
        if self.event_batch_limit == 0 {
            return Err(invalid("event_batch_limit", &self.event_batch_limit));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &dyn std::fmt::Debug) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: format!("{:?}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TerminalConfig::default();
        assert_eq!(config.rssi_poll_interval, Duration::from_secs(3));
        assert_eq!(config.message_log_capacity, 500);
        assert_eq!(config.message_eviction_batch, 100);
        assert_eq!(config.rssi_update_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_setters() {
        let config = TerminalConfig::default()
            .with_rssi_poll_interval(Duration::from_millis(500))
            .with_message_log_bounds(10, 2)
            .with_history_capacity(3);

        assert_eq!(config.rssi_poll_interval, Duration::from_millis(500));
        assert_eq!(config.message_log_capacity, 10);
        assert_eq!(config.message_eviction_batch, 2);
        assert_eq!(config.history_capacity, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_interval = TerminalConfig::default().with_rssi_poll_interval(Duration::ZERO);
        assert!(matches!(
            zero_interval.validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "rssi_poll_interval"
        ));

        let oversized_batch = TerminalConfig::default().with_message_log_bounds(10, 11);
        assert!(oversized_batch.validate().is_err());

        let no_stride = TerminalConfig::default().with_registry_sort_throttle(20, 0);
        assert!(no_stride.validate().is_err());
    }
}
