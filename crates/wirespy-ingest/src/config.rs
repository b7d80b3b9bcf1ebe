//! Pipeline configuration.

use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::time::Duration;

/// Default capacity of each per-kind event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default accumulator threshold; a flush fires once a buffer holds more.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Default number of records persisted per dedup key.
pub const DEFAULT_MAX_PER_KEY: i64 = 20;

/// Default number of dedup keys a suppressor remembers.
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 10_000;

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Slots per event queue. Producers block when a queue is full.
    pub queue_capacity: usize,

    /// Flush a batched kind once its buffer holds more than this many records.
    pub batch_size: usize,

    /// Records persisted per dedup key before further ones are suppressed.
    pub max_per_key: i64,

    /// Dedup keys remembered per suppressed kind (FIFO eviction).
    pub max_tracked_keys: usize,

    /// Flush buffers whose oldest record is older than this.
    ///
    /// `None` flushes only on size and on shutdown, which leaves records
    /// invisible to the store under low traffic.
    pub flush_interval: Option<Duration>,

    /// Deadline for a single store call.
    pub write_timeout: Duration,

    /// Retry policy for failed store calls.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_per_key: DEFAULT_MAX_PER_KEY,
            max_tracked_keys: DEFAULT_MAX_TRACKED_KEYS,
            flush_interval: None,
            write_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.max_per_key <= 0 {
            return Err(Error::Config("max_per_key must be positive".to_string()));
        }
        if self.max_tracked_keys == 0 {
            return Err(Error::Config(
                "max_tracked_keys must be positive".to_string(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write_timeout must be positive".to_string()));
        }
        if self.flush_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::Config(
                "flush_interval must be positive when set".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
