//! Bounded duplicate suppression.
//!
//! Announcements of the same block or transaction arrive from many peers.
//! Persisting a handful of sightings per hash is useful (propagation
//! analysis); persisting every one is not. [`DuplicateSuppressor`] caps the
//! number of accepted records per dedup key and bounds its own memory.
//!
//! # Semantics
//!
//! - A key seen for the first time is seeded with a baseline count (the
//!   number of rows the store already holds for it), so the cap holds
//!   across restarts.
//! - `should_accept` returns `true` and increments while the count is below
//!   `max_per_key`.
//! - Keys are remembered in first-seen order. Once more than
//!   `max_tracked_keys` are tracked, the oldest is forgotten (FIFO, not LRU).
//!   A forgotten key that shows up again is re-seeded from the store. The
//!   cap is a volume throttle, not an exact guarantee.
//!
//! Not thread-safe; owned by the ingestion loop.

use std::collections::{HashMap, VecDeque};

/// Per-key observation cap with a FIFO-bounded key ledger.
#[derive(Debug)]
pub struct DuplicateSuppressor {
    max_per_key: i64,
    max_tracked_keys: usize,
    counts: HashMap<String, i64>,
    ledger: VecDeque<String>,
    evictions: u64,
}

impl DuplicateSuppressor {
    pub fn new(max_per_key: i64, max_tracked_keys: usize) -> Self {
        Self {
            max_per_key,
            max_tracked_keys,
            counts: HashMap::new(),
            ledger: VecDeque::new(),
            evictions: 0,
        }
    }

    /// Accept or reject one observation of `key`, assuming nothing is stored
    /// for keys seen for the first time.
    pub fn should_accept(&mut self, key: &str) -> bool {
        self.should_accept_with(key, || 0)
    }

    /// Accept or reject one observation of `key`.
    ///
    /// `baseline` is only called when the key is not currently tracked and
    /// returns how many records for it are already persisted.
    pub fn should_accept_with<F>(&mut self, key: &str, baseline: F) -> bool
    where
        F: FnOnce() -> i64,
    {
        if !self.counts.contains_key(key) {
            self.track(key, baseline().max(0));
        }

        match self.counts.get_mut(key) {
            Some(count) if *count < self.max_per_key => {
                *count += 1;
                true
            }
            _ => false,
        }
    }

    /// Start tracking a key and evict the oldest ones past the ledger cap.
    fn track(&mut self, key: &str, count: i64) {
        self.counts.insert(key.to_string(), count);
        self.ledger.push_back(key.to_string());

        while self.ledger.len() > self.max_tracked_keys {
            if let Some(oldest) = self.ledger.pop_front() {
                self.counts.remove(&oldest);
                self.evictions += 1;
            }
        }
    }

    /// Current count for a tracked key.
    pub fn count(&self, key: &str) -> Option<i64> {
        self.counts.get(key).copied()
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.counts.contains_key(key)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.ledger.len()
    }

    /// Keys forgotten so far to keep the ledger bounded.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}
