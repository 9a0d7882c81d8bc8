//! Batcher configuration.
//!
//! The two flush thresholds come from the embedding process. Non-positive
//! values fall back to the defaults, so `BatcherConfig::new(-1, -1)` and
//! `BatcherConfig::new(32, 5000)` are the same configuration.
//!
//! ```ignore
//! use predbatch::BatcherConfig;
//! use std::time::Duration;
//!
//! let config = BatcherConfig::new(16, 250)
//!     .with_poll_interval(Duration::from_micros(500));
//! ```

use std::time::Duration;
use serde::Deserialize;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_LATENCY_MS: u64 = 5000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(100);
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Flush thresholds and limits for one batcher instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawBatcherConfig")]
pub struct BatcherConfig {
    /// Instance count at which a batch is flushed
    pub max_batch_size: usize,

    /// Age at which a non-empty batch is flushed
    pub max_latency: Duration,

    /// How often the accumulator re-checks the latency trigger while idle
    pub poll_interval: Duration,

    /// Largest request body accepted on a predict path
    pub max_body_bytes: usize,
}

impl BatcherConfig {
    /// Builds a configuration, replacing non-positive thresholds with defaults.
    pub fn new(max_batch_size: i64, max_latency_ms: i64) -> Self {
        let max_batch_size = if max_batch_size <= 0 {
            DEFAULT_MAX_BATCH_SIZE
        } else {
            max_batch_size as usize
        };
        let max_latency_ms = if max_latency_ms <= 0 {
            DEFAULT_MAX_LATENCY_MS
        } else {
            max_latency_ms as u64
        };

        Self {
            max_batch_size,
            max_latency: Duration::from_millis(max_latency_ms),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if !poll_interval.is_zero() {
            self.poll_interval = poll_interval;
        }
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        if max_body_bytes > 0 {
            self.max_body_bytes = max_body_bytes;
        }
        self
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Serialized form, in the units a config file or environment carries.
#[derive(Debug, Deserialize)]
struct RawBatcherConfig {
    #[serde(default)]
    max_batch_size: i64,
    #[serde(default)]
    max_latency_ms: i64,
    #[serde(default)]
    poll_interval_us: u64,
    #[serde(default)]
    max_body_bytes: usize,
}

impl From<RawBatcherConfig> for BatcherConfig {
    fn from(raw: RawBatcherConfig) -> Self {
        BatcherConfig::new(raw.max_batch_size, raw.max_latency_ms)
            .with_poll_interval(Duration::from_micros(raw.poll_interval_us))
            .with_max_body_bytes(raw.max_body_bytes)
    }
}
