//! Size-triggered batch accumulation for high-volume kinds.

use std::time::{Duration, Instant};
use wirespy_core::{Event, EventKind};

/// Buffers records of one kind until the buffer holds more than
/// `batch_size`, then hands the whole buffer back for a single store write.
#[derive(Debug)]
pub struct BatchAccumulator {
    kind: EventKind,
    batch_size: usize,
    buffer: Vec<Event>,
    /// When the oldest buffered record was added.
    oldest: Option<Instant>,
}

impl BatchAccumulator {
    pub fn new(kind: EventKind, batch_size: usize) -> Self {
        Self {
            kind,
            batch_size,
            buffer: Vec::with_capacity(batch_size + 1),
            oldest: None,
        }
    }

    /// Buffer a record.
    ///
    /// Returns the full buffer once its length exceeds `batch_size`; the
    /// accumulator is empty afterwards.
    pub fn add(&mut self, event: Event) -> Option<Vec<Event>> {
        debug_assert_eq!(event.kind(), self.kind);

        if self.buffer.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.buffer.push(event);

        if self.buffer.len() > self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take whatever is buffered, leaving the accumulator empty.
    pub fn take(&mut self) -> Vec<Event> {
        self.oldest = None;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size + 1))
    }

    /// Whether the oldest buffered record has waited at least `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.oldest.is_some_and(|oldest| oldest.elapsed() >= max_age)
    }

    /// Time until the oldest buffered record becomes stale.
    pub fn time_until_stale(&self, max_age: Duration) -> Option<Duration> {
        self.oldest
            .map(|oldest| max_age.saturating_sub(oldest.elapsed()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
