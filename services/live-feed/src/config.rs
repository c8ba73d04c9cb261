//! Feed configuration
//!
//! Deserialized from the `[feed]` table of the gateway config. Every field has
//! a default so an empty table is a working configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::emitter::BatchSize;
use crate::upstream::DEFAULT_UPSTREAM_URL;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid drain batch range: min={min}, max={max}")]
    InvalidBatch { min: usize, max: usize },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Observations endpoint of the upstream API.
    pub upstream_url: String,
    /// Page size requested per poll.
    pub per_page: u32,
    /// Upstream poll period (default: 15s).
    pub poll_interval_secs: u64,
    /// Per-request timeout for the upstream client.
    pub request_timeout_secs: u64,
    /// Buffer drain period (default: 1s).
    pub drain_interval_ms: u64,
    /// Smallest batch drained per tick.
    pub batch_min: usize,
    /// Largest batch drained per tick. Equal to `batch_min` for a fixed cap.
    pub batch_max: usize,
    /// Ingestion buffer capacity; oldest entries are evicted beyond it.
    pub buffer_capacity: usize,
    /// Per-topic channel capacity on the bus.
    pub bus_capacity: usize,
    /// Recent-history replay window for new subscriptions. Disabled when unset.
    pub replay_window_secs: Option<u64>,
    /// Upper bound on retained replay messages.
    pub replay_max_entries: usize,
    /// How long a push to one viewer may block before it counts as failed.
    pub push_timeout_ms: u64,
    /// Outbound queue length per viewer connection.
    pub viewer_queue: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            per_page: 150,
            poll_interval_secs: 15,
            request_timeout_secs: 10,
            drain_interval_ms: 1_000,
            batch_min: 1,
            batch_max: 5,
            buffer_capacity: 10_000,
            bus_capacity: 1_024,
            replay_window_secs: None,
            replay_max_entries: 5_000,
            push_timeout_ms: 5_000,
            viewer_queue: 64,
        }
    }
}

impl FeedConfig {
    /// Reject settings that would stall or panic a task at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_min == 0 || self.batch_min > self.batch_max {
            return Err(ConfigError::InvalidBatch {
                min: self.batch_min,
                max: self.batch_max,
            });
        }
        let non_zero = [
            ("per_page", self.per_page as u64),
            ("poll_interval_secs", self.poll_interval_secs),
            ("drain_interval_ms", self.drain_interval_ms),
            ("buffer_capacity", self.buffer_capacity as u64),
            ("bus_capacity", self.bus_capacity as u64),
            ("push_timeout_ms", self.push_timeout_ms),
            ("viewer_queue", self.viewer_queue as u64),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn replay_window(&self) -> Option<Duration> {
        self.replay_window_secs.map(Duration::from_secs)
    }

    pub fn batch_size(&self) -> BatchSize {
        BatchSize::between(self.batch_min, self.batch_max)
    }
}
