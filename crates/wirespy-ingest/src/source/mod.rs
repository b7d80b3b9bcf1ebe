//! Event source adapters.
//!
//! Sources turn an external feed into validated [`Event`] records and hand
//! them to a callback, usually one that enqueues into the pipeline.
//!
//! # Available Sources
//!
//! - [`JsonlSource`] - Replays captured events from JSONL files

mod jsonl;

pub use jsonl::{JsonlConfig, JsonlSource};

use crate::Result;
use wirespy_core::Event;

/// A source of captured network events.
pub trait EventSource {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Feed every valid record to `handler`.
    ///
    /// The handler returns `Ok(true)` to continue, `Ok(false)` to stop
    /// gracefully, or `Err` to abort.
    fn process<F>(&mut self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(Event) -> Result<bool>;
}

/// Statistics from processing an event source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Non-blank lines encountered.
    pub total_events: usize,

    /// Records handed to the handler.
    pub valid_events: usize,

    /// Records skipped as unparseable or invalid.
    pub invalid_events: usize,

    /// Records the handler rejected.
    pub handler_errors: usize,

    /// Files read to completion or until the handler stopped.
    pub files_processed: usize,

    /// Total size of the files read.
    pub bytes_read: usize,
}
