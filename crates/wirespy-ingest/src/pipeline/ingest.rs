//! The ingestion loop and its public handle.
//!
//! [`Pipeline::start`] spawns a dedicated thread that owns the queue
//! receivers, one [`DuplicateSuppressor`] per suppressed kind, one
//! [`BatchAccumulator`] per batched kind, the store, and a current-thread
//! tokio runtime used to drive store futures. Producers get a cloneable
//! [`IngestHandle`].
//!
//! # Lifecycle
//!
//! ```text
//! start ─► health check ─► Polling ──close()──► Draining ─► stopped
//!               │                                   │
//!               └─ failure: Error::Config            └─ drain queues, flush buffers
//! ```

use super::accumulator::BatchAccumulator;
use super::queue::{EventQueues, Polled, QueueReceivers, event_queues};
use super::suppressor::DuplicateSuppressor;
use crate::config::PipelineConfig;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{Store, UpsertOutcome};
use crate::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};
use wirespy_core::{Event, EventKind, TransactionContent, WritePolicy};

/// Counters reported when the pipeline shuts down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Records dequeued by the loop.
    pub received: u64,

    /// Records that failed validation and never reached a queue.
    pub invalid: u64,

    /// Records that passed duplicate suppression.
    pub accepted: u64,

    /// Records dropped by duplicate suppression.
    pub suppressed: u64,

    /// Records persisted.
    pub written: u64,

    /// Records lost after retries ran out or on a non-retryable error.
    pub dropped: u64,

    /// Transaction bodies whose hash was already stored.
    pub conflicts_ignored: u64,

    /// Batches flushed because a buffer exceeded the batch size.
    pub size_flushes: u64,

    /// Batches flushed because their oldest record exceeded the flush interval.
    pub idle_flushes: u64,

    /// Batches flushed during shutdown.
    pub drain_flushes: u64,
}

/// Why a buffered batch is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Idle,
    Drain,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Idle => "idle",
            Self::Drain => "drain",
        }
    }
}

/// Producer-side handle. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct IngestHandle {
    queues: Arc<EventQueues>,
    invalid: Arc<AtomicU64>,
}

impl IngestHandle {
    /// Validate a record and enqueue it.
    ///
    /// Blocks while the record's queue is full. A malformed record is logged,
    /// counted in [`IngestStats::invalid`] and dropped; the call still
    /// succeeds. The only error is [`Error::ClosedQueue`], once the pipeline
    /// is closed.
    pub fn enqueue(&self, event: impl Into<Event>) -> Result<()> {
        let event = event.into();
        if let Err(e) = event.validate() {
            if self.queues.is_closed() {
                return Err(Error::ClosedQueue);
            }
            let kind = event.kind();
            self.invalid.fetch_add(1, Ordering::Relaxed);
            counter!("ingest_events_invalid_total", "kind" => kind.as_str()).increment(1);
            warn!(kind = %kind, peer_id = event.peer_id(), error = %e, "Dropping invalid record");
            return Ok(());
        }
        self.queues.enqueue(event)
    }

    pub fn is_closed(&self) -> bool {
        self.queues.is_closed()
    }

    /// Records waiting in a kind's queue.
    pub fn queue_len(&self, kind: EventKind) -> usize {
        self.queues.len(kind)
    }
}

/// A running ingestion pipeline.
///
/// Dropping it closes it; call [`Pipeline::close`] to get the final stats.
pub struct Pipeline {
    queues: Arc<EventQueues>,
    invalid: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<IngestStats>>,
    stats: Option<IngestStats>,
}

impl Pipeline {
    /// Validate `config`, check the store is reachable, and start the loop.
    ///
    /// Returns [`Error::Config`] for an invalid configuration or a failed
    /// store health check; no pipeline is started in that case.
    pub fn start<S: Store>(config: PipelineConfig, store: S) -> Result<Self> {
        config.validate()?;

        let (queues, receivers) = event_queues(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let worker = thread::Builder::new()
            .name("wirespy-ingest".to_string())
            .spawn(move || run_worker(config, store, receivers, shutdown_rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::Config(
                    "ingestion loop exited during startup".to_string(),
                ));
            }
        }

        Ok(Self {
            queues: Arc::new(queues),
            invalid: Arc::new(AtomicU64::new(0)),
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            stats: None,
        })
    }

    /// A producer handle for this pipeline.
    pub fn handle(&self) -> IngestHandle {
        IngestHandle {
            queues: Arc::clone(&self.queues),
            invalid: Arc::clone(&self.invalid),
        }
    }

    /// Stop accepting records, drain every queue, flush every buffer, and
    /// wait for the loop to finish.
    ///
    /// Calling it again returns the same stats without doing anything.
    pub fn close(&mut self) -> Result<IngestStats> {
        if let Some(stats) = &self.stats {
            debug!("Pipeline already closed");
            return Ok(stats.clone());
        }

        self.queues.close();
        // Disconnecting the shutdown channel wakes the loop.
        drop(self.shutdown.take());

        let mut stats = match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::Io(std::io::Error::other("ingestion loop panicked")))?,
            None => IngestStats::default(),
        };
        // Counted producer-side, outside the loop.
        stats.invalid = self.invalid.load(Ordering::Relaxed);

        self.stats = Some(stats.clone());
        Ok(stats)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close pipeline: {}", e);
        }
    }
}

/// Thread body: build the runtime, check the store, then run the loop.
fn run_worker<S: Store>(
    config: PipelineConfig,
    store: S,
    receivers: QueueReceivers,
    shutdown: Receiver<()>,
    ready: Sender<Result<()>>,
) -> IngestStats {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return IngestStats::default();
        }
    };

    let health = rt.block_on(retry_with_backoff(
        &RetryPolicy::none(),
        config.write_timeout,
        |_| {},
        || store.health_check(),
    ));
    if let Err(e) = health {
        let _ = ready.send(Err(Error::Config(format!(
            "store health check failed: {}",
            e
        ))));
        return IngestStats::default();
    }
    let _ = ready.send(Ok(()));

    IngestLoop::new(config, store, receivers, shutdown, rt).run()
}

struct IngestLoop<S: Store> {
    config: PipelineConfig,
    store: S,
    receivers: QueueReceivers,
    shutdown: Receiver<()>,
    rt: Runtime,
    /// Indexed by [`EventKind::index`]; `None` for kinds that are not suppressed.
    suppressors: Vec<Option<DuplicateSuppressor>>,
    /// Indexed by [`EventKind::index`]; `None` for kinds that are not batched.
    accumulators: Vec<Option<BatchAccumulator>>,
    stats: IngestStats,
}

impl<S: Store> IngestLoop<S> {
    fn new(
        config: PipelineConfig,
        store: S,
        receivers: QueueReceivers,
        shutdown: Receiver<()>,
        rt: Runtime,
    ) -> Self {
        let suppressors = EventKind::ALL
            .iter()
            .map(|kind| {
                kind.is_suppressed().then(|| {
                    DuplicateSuppressor::new(config.max_per_key, config.max_tracked_keys)
                })
            })
            .collect();

        let accumulators = EventKind::ALL
            .iter()
            .map(|&kind| {
                (kind.write_policy() == WritePolicy::Batched)
                    .then(|| BatchAccumulator::new(kind, config.batch_size))
            })
            .collect();

        Self {
            config,
            store,
            receivers,
            shutdown,
            rt,
            suppressors,
            accumulators,
            stats: IngestStats::default(),
        }
    }

    fn run(mut self) -> IngestStats {
        info!(
            batch_size = self.config.batch_size,
            max_per_key = self.config.max_per_key,
            flush_interval_ms = self.config.flush_interval.map(|d| d.as_millis() as u64),
            "Ingestion loop started"
        );
        gauge!("ingest_running").set(1.0);

        loop {
            let wait = self.next_idle_deadline();
            match self.receivers.next(&self.shutdown, wait) {
                Polled::Event(event) => self.process(event),
                Polled::Idle => {}
                Polled::Shutdown => break,
            }
            self.flush_stale();
        }

        self.drain();

        gauge!("ingest_running").set(0.0);
        info!(
            received = self.stats.received,
            written = self.stats.written,
            suppressed = self.stats.suppressed,
            dropped = self.stats.dropped,
            "Ingestion loop stopped"
        );
        self.stats
    }

    /// How long the loop may block before a buffer goes stale.
    fn next_idle_deadline(&self) -> Option<Duration> {
        let interval = self.config.flush_interval?;
        self.accumulators
            .iter()
            .flatten()
            .filter_map(|acc| acc.time_until_stale(interval))
            .min()
    }

    fn process(&mut self, event: Event) {
        let kind = event.kind();
        self.stats.received += 1;
        counter!("ingest_events_total", "kind" => kind.as_str()).increment(1);
        gauge!("ingest_queue_depth", "kind" => kind.as_str())
            .set(self.receivers.len(kind) as f64);

        if !self.accept(&event) {
            self.stats.suppressed += 1;
            counter!("ingest_events_suppressed_total", "kind" => kind.as_str()).increment(1);
            if let (Some(key), Some(code)) = (event.dedup_key(), event.message_code()) {
                debug!(kind = %kind, key, code = %code, "Suppressed duplicate announcement");
            }
            return;
        }
        self.stats.accepted += 1;

        match kind.write_policy() {
            WritePolicy::Batched => {
                let full = self.accumulators[kind.index()]
                    .as_mut()
                    .and_then(|acc| acc.add(event));
                if let Some(batch) = full {
                    self.flush(kind, batch, FlushTrigger::Size);
                }
            }
            WritePolicy::WriteThrough => {
                if let Event::Disconnect(disconnect) = &event {
                    debug!(
                        peer_id = %disconnect.peer_id,
                        reason = %disconnect.reason,
                        "Peer disconnected"
                    );
                }
                self.write_through(kind, event)
            }
            WritePolicy::UpsertIgnoreConflict => {
                if let Event::TransactionContent(content) = event {
                    self.upsert(&content);
                }
            }
        }
    }

    /// Run duplicate suppression for suppressed kinds; others always pass.
    fn accept(&mut self, event: &Event) -> bool {
        let kind = event.kind();
        let Some(key) = event.dedup_key() else {
            return true;
        };

        let Self {
            config,
            store,
            rt,
            suppressors,
            ..
        } = self;
        let Some(suppressor) = suppressors[kind.index()].as_mut() else {
            return true;
        };

        suppressor.should_accept_with(key, || {
            lookup_baseline(rt, store, config.write_timeout, kind, key)
        })
    }

    fn flush(&mut self, kind: EventKind, batch: Vec<Event>, trigger: FlushTrigger) {
        if batch.is_empty() {
            return;
        }

        match trigger {
            FlushTrigger::Size => self.stats.size_flushes += 1,
            FlushTrigger::Idle => self.stats.idle_flushes += 1,
            FlushTrigger::Drain => self.stats.drain_flushes += 1,
        }
        counter!(
            "ingest_batches_flushed_total",
            "kind" => kind.as_str(),
            "trigger" => trigger.as_str()
        )
        .increment(1);
        debug!(
            kind = %kind,
            records = batch.len(),
            trigger = trigger.as_str(),
            "Flushing batch"
        );

        self.insert(kind, &batch);
    }

    fn write_through(&mut self, kind: EventKind, event: Event) {
        self.insert(kind, std::slice::from_ref(&event));
    }

    /// Insert records of one kind with retries, dropping them on failure.
    fn insert(&mut self, kind: EventKind, events: &[Event]) {
        let started = Instant::now();
        let store = &self.store;
        let result = self.rt.block_on(retry_with_backoff(
            &self.config.retry,
            self.config.write_timeout,
            |_| counter!("store_write_retries_total", "kind" => kind.as_str()).increment(1),
            || store.insert_batch(kind, events),
        ));
        histogram!("store_write_duration_seconds", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        let count = events.len() as u64;
        match result {
            Ok(()) => {
                self.stats.written += count;
                counter!("store_records_written_total", "kind" => kind.as_str()).increment(count);
            }
            Err(e) => self.record_drop(kind, count, &e),
        }
    }

    fn upsert(&mut self, content: &TransactionContent) {
        let kind = EventKind::TransactionContent;
        let started = Instant::now();
        let store = &self.store;
        let result = self.rt.block_on(retry_with_backoff(
            &self.config.retry,
            self.config.write_timeout,
            |_| counter!("store_write_retries_total", "kind" => kind.as_str()).increment(1),
            || store.upsert_ignore_conflict(content),
        ));
        histogram!("store_write_duration_seconds", "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(UpsertOutcome::Inserted) => {
                self.stats.written += 1;
                counter!("store_records_written_total", "kind" => kind.as_str()).increment(1);
            }
            Ok(UpsertOutcome::ConflictIgnored) => {
                self.stats.conflicts_ignored += 1;
                counter!("store_conflicts_ignored_total").increment(1);
                debug!(hash = %content.hash, "Transaction content already stored");
            }
            Err(e) => self.record_drop(kind, 1, &e),
        }
    }

    fn record_drop(&mut self, kind: EventKind, count: u64, e: &Error) {
        self.stats.dropped += count;
        counter!("store_write_errors_total", "kind" => kind.as_str()).increment(1);
        counter!("store_records_dropped_total", "kind" => kind.as_str()).increment(count);
        error!(kind = %kind, records = count, error = %e, "Dropping records after failed write");
    }

    /// Flush buffers whose oldest record has waited past the flush interval.
    fn flush_stale(&mut self) {
        let Some(interval) = self.config.flush_interval else {
            return;
        };

        for kind in EventKind::ALL {
            let stale = self.accumulators[kind.index()]
                .as_mut()
                .filter(|acc| acc.is_stale(interval))
                .map(BatchAccumulator::take);
            if let Some(batch) = stale {
                self.flush(kind, batch, FlushTrigger::Idle);
            }
        }
    }

    /// Process everything still queued, then flush every buffer.
    fn drain(&mut self) {
        let pending: Vec<Event> = self.receivers.drain().collect();
        info!(pending = pending.len(), "Draining queues");

        for event in pending {
            self.process(event);
        }

        for kind in EventKind::ALL {
            let batch = self.accumulators[kind.index()]
                .as_mut()
                .filter(|acc| !acc.is_empty())
                .map(BatchAccumulator::take);
            if let Some(batch) = batch {
                self.flush(kind, batch, FlushTrigger::Drain);
            }
        }
    }
}

/// Ask the store how many records already exist for a key.
///
/// One attempt, bounded by `deadline`. A failed lookup counts as zero.
fn lookup_baseline<S: Store>(
    rt: &Runtime,
    store: &S,
    deadline: Duration,
    kind: EventKind,
    key: &str,
) -> i64 {
    let result = rt.block_on(retry_with_backoff(
        &RetryPolicy::none(),
        deadline,
        |_| {},
        || store.count_by_key(kind, key),
    ));

    match result {
        Ok(count) => count,
        Err(e) => {
            warn!(kind = %kind, key, error = %e, "Baseline lookup failed, assuming zero");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wirespy_core::{
        BlockAnnouncement, DisconnectReason, MessageCode, PeerDisconnect, PeerHeartbeat, PeerHello,
        PeerSighting, TransactionAnnouncement,
    };

    fn block(hash: &str, peer: &str) -> BlockAnnouncement {
        BlockAnnouncement {
            peer_id: peer.to_string(),
            hash: hash.to_string(),
            number: 1,
            code: MessageCode::NewBlockHashes,
            observed_at: Utc::now(),
        }
    }

    fn tx(hash: &str) -> TransactionAnnouncement {
        TransactionAnnouncement {
            peer_id: "enode-a".to_string(),
            hash: hash.to_string(),
            code: MessageCode::NewPooledTransactionHashes,
            observed_at: Utc::now(),
        }
    }

    fn peer(id: &str) -> PeerSighting {
        PeerSighting {
            peer_id: id.to_string(),
            version: 68,
            address: "198.51.100.4:30303".to_string(),
            observed_at: Utc::now(),
        }
    }

    fn hello(id: &str) -> PeerHello {
        PeerHello {
            peer_id: id.to_string(),
            name: "Geth/v1.13.5-stable/linux-amd64/go1.21.4".to_string(),
            caps: vec!["eth/67".to_string(), "eth/68".to_string(), "snap/1".to_string()],
            enode: format!("enode://{}@198.51.100.4:30303", id),
            enr: String::new(),
            local_address: "10.0.0.1:30303".to_string(),
            remote_address: "198.51.100.4:30303".to_string(),
            inbound: false,
            trusted: false,
            is_static: true,
            observed_at: Utc::now(),
        }
    }

    fn heartbeat(id: &str) -> PeerHeartbeat {
        PeerHeartbeat {
            peer_id: id.to_string(),
            observed_at: Utc::now(),
        }
    }

    fn content(hash: &str, data_hex: &str) -> TransactionContent {
        TransactionContent {
            hash: hash.to_string(),
            from: "0x1111".to_string(),
            to: Some("0x2222".to_string()),
            nonce: 0,
            value: "1".to_string(),
            gas_price: "1".to_string(),
            gas: 21_000,
            data_hex: data_hex.to_string(),
            signature: None,
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Wraps a SQLite store and fails calls for one kind on demand.
    #[derive(Clone)]
    struct FlakyStore {
        inner: SqliteStore,
        failing_kind: EventKind,
        failures_left: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
        healthy: bool,
    }

    impl FlakyStore {
        fn new(failing_kind: EventKind, failures: usize) -> Self {
            Self {
                inner: SqliteStore::open_in_memory().unwrap(),
                failing_kind,
                failures_left: Arc::new(AtomicUsize::new(failures)),
                attempts: Arc::new(AtomicUsize::new(0)),
                healthy: true,
            }
        }

        fn should_fail(&self, kind: EventKind) -> bool {
            if kind != self.failing_kind {
                return false;
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl Store for FlakyStore {
        async fn insert_batch(&self, kind: EventKind, events: &[Event]) -> Result<()> {
            if self.should_fail(kind) {
                return Err(Error::StoreUnavailable("scripted failure".to_string()));
            }
            self.inner.insert_batch(kind, events).await
        }

        async fn upsert_ignore_conflict(
            &self,
            content: &TransactionContent,
        ) -> Result<UpsertOutcome> {
            if self.should_fail(EventKind::TransactionContent) {
                return Err(Error::StoreUnavailable("scripted failure".to_string()));
            }
            self.inner.upsert_ignore_conflict(content).await
        }

        async fn count_by_key(&self, kind: EventKind, key: &str) -> Result<i64> {
            self.inner.count_by_key(kind, key).await
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(Error::StoreUnavailable("connection refused".to_string()))
            }
        }
    }

    #[test]
    fn test_same_hash_blocks_capped_at_max_per_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        for i in 0..1_500 {
            handle.enqueue(block("0xsame", &format!("peer-{}", i))).unwrap();
        }
        let stats = pipeline.close().unwrap();

        assert_eq!(store.row_count(EventKind::Block).unwrap(), 20);
        assert_eq!(stats.received, 1_500);
        assert_eq!(stats.accepted, 20);
        assert_eq!(stats.suppressed, 1_480);
        assert_eq!(stats.size_flushes, 0);
        assert_eq!(stats.drain_flushes, 1);
    }

    #[test]
    fn test_distinct_hashes_flush_once_mid_stream() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        for i in 0..1_500 {
            handle.enqueue(block(&format!("0x{:x}", i), "enode-a")).unwrap();
        }
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.size_flushes, 1);
        assert_eq!(stats.drain_flushes, 1);
        assert_eq!(stats.written, 1_500);
        assert_eq!(store.row_count(EventKind::Block).unwrap(), 1_500);
    }

    #[test]
    fn test_content_keeps_first_payload() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        handle.enqueue(content("0xabc", "01")).unwrap();
        handle.enqueue(content("0xabc", "02")).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.conflicts_ignored, 1);
        assert_eq!(store.row_count(EventKind::TransactionContent).unwrap(), 1);
        let stored = store.transaction_content("0xabc").unwrap().unwrap();
        assert_eq!(stored.data_hex, "01");
    }

    #[test]
    fn test_peers_written_through() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        handle.enqueue(peer("enode-a")).unwrap();
        handle.enqueue(peer("enode-a")).unwrap();
        let stats = pipeline.close().unwrap();

        // Peer sightings are neither suppressed nor batched
        assert_eq!(store.row_count(EventKind::Peer).unwrap(), 2);
        assert_eq!(stats.suppressed, 0);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.size_flushes + stats.drain_flushes, 0);
    }

    #[test]
    fn test_hellos_written_through() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        handle.enqueue(hello("enode-a")).unwrap();
        handle.enqueue(hello("enode-a")).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(store.row_count(EventKind::Hello).unwrap(), 2);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.suppressed, 0);
        assert_eq!(stats.size_flushes + stats.drain_flushes, 0);
    }

    #[test]
    fn test_disconnects_written_through() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        for reason in [DisconnectReason::TooManyPeers, DisconnectReason::Unknown(0x42)] {
            handle
                .enqueue(PeerDisconnect {
                    peer_id: "enode-a".to_string(),
                    reason,
                    observed_at: Utc::now(),
                })
                .unwrap();
        }
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(store.row_count(EventKind::Disconnect).unwrap(), 2);
        assert_eq!(
            store.disconnect_reasons("enode-a").unwrap(),
            vec![DisconnectReason::TooManyPeers, DisconnectReason::Unknown(0x42)]
        );
    }

    #[test]
    fn test_pings_written_through() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        for _ in 0..3 {
            handle.enqueue(Event::Ping(heartbeat("enode-a"))).unwrap();
        }
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.written, 3);
        assert_eq!(store.row_count(EventKind::Ping).unwrap(), 3);
        assert_eq!(store.row_count(EventKind::Pong).unwrap(), 0);
    }

    #[test]
    fn test_pongs_written_through() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        handle.enqueue(Event::Pong(heartbeat("enode-a"))).unwrap();
        handle.enqueue(Event::Pong(heartbeat("enode-b"))).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.drain_flushes, 0);
        assert_eq!(store.row_count(EventKind::Pong).unwrap(), 2);
        assert_eq!(store.row_count(EventKind::Ping).unwrap(), 0);
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store).unwrap();
        let handle = pipeline.handle();

        let first = pipeline.close().unwrap();
        assert!(handle.is_closed());
        assert!(matches!(handle.enqueue(tx("0x1")), Err(Error::ClosedQueue)));

        let second = pipeline.close().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_record_dropped_without_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();

        handle.enqueue(tx("")).unwrap();
        handle.enqueue(peer(" ")).unwrap();
        handle.enqueue(content("0xabc", "zz")).unwrap();
        handle.enqueue(tx("0x1")).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.invalid, 3);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.written, 1);
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 1);
        assert_eq!(store.row_count(EventKind::Peer).unwrap(), 0);
        assert_eq!(store.row_count(EventKind::TransactionContent).unwrap(), 0);
    }

    #[test]
    fn test_invalid_record_after_close_reports_closed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store).unwrap();
        let handle = pipeline.handle();

        pipeline.close().unwrap();
        assert!(matches!(handle.enqueue(tx("")), Err(Error::ClosedQueue)));
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::start(config, store),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_failed_health_check_is_fatal() {
        let mut store = FlakyStore::new(EventKind::Block, 0);
        store.healthy = false;

        assert!(matches!(
            Pipeline::start(fast_config(), store),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let store = FlakyStore::new(EventKind::Peer, 2);
        let mut pipeline = Pipeline::start(fast_config(), store.clone()).unwrap();

        pipeline.handle().enqueue(peer("enode-a")).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.row_count(EventKind::Peer).unwrap(), 1);
    }

    #[test]
    fn test_exhausted_retries_drop_batch_and_continue() {
        let store = FlakyStore::new(EventKind::Block, usize::MAX);
        let mut pipeline = Pipeline::start(fast_config(), store.clone()).unwrap();
        let handle = pipeline.handle();

        for i in 0..5 {
            handle.enqueue(block(&format!("0x{:x}", i), "enode-a")).unwrap();
        }
        handle.enqueue(peer("enode-b")).unwrap();
        handle.enqueue(content("0xabc", "")).unwrap();
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.dropped, 5);
        assert_eq!(stats.written, 2);
        // One attempt plus two retries for the single drain batch
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.row_count(EventKind::Block).unwrap(), 0);
        assert_eq!(store.inner.row_count(EventKind::Peer).unwrap(), 1);
    }

    #[test]
    fn test_restart_seeds_counts_from_store() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wirespy.db");

        {
            let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
            let mut pipeline = Pipeline::start(PipelineConfig::default(), store).unwrap();
            let handle = pipeline.handle();
            for i in 0..15 {
                handle.enqueue(tx("0xfeed")).unwrap();
                handle.enqueue(block("0xbeef", &format!("peer-{}", i))).unwrap();
            }
            pipeline.close().unwrap();
        }

        let store = SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();
        let handle = pipeline.handle();
        for _ in 0..15 {
            handle.enqueue(tx("0xfeed")).unwrap();
        }
        let stats = pipeline.close().unwrap();

        assert_eq!(stats.accepted, 5);
        assert_eq!(stats.suppressed, 10);
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 20);
        assert_eq!(store.row_count(EventKind::Block).unwrap(), 15);
    }

    #[test]
    fn test_idle_flush_makes_records_visible() {
        let store = SqliteStore::open_in_memory().unwrap();
        let config = PipelineConfig {
            flush_interval: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let mut pipeline = Pipeline::start(config, store.clone()).unwrap();
        let handle = pipeline.handle();

        for i in 0..3 {
            handle.enqueue(tx(&format!("0x{:x}", i))).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.row_count(EventKind::Transaction).unwrap() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 3);

        let stats = pipeline.close().unwrap();
        assert!(stats.idle_flushes >= 1);
        assert_eq!(stats.drain_flushes, 0);
    }

    #[test]
    fn test_without_flush_interval_records_wait_for_drain() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut pipeline = Pipeline::start(PipelineConfig::default(), store.clone()).unwrap();

        pipeline.handle().enqueue(tx("0x1")).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 0);

        pipeline.close().unwrap();
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let config = PipelineConfig {
            queue_capacity: 16,
            batch_size: 100,
            ..Default::default()
        };
        let mut pipeline = Pipeline::start(config, store.clone()).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let handle = pipeline.handle();
                thread::spawn(move || {
                    for i in 0..250 {
                        handle.enqueue(tx(&format!("0x{:x}-{:x}", p, i))).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let stats = pipeline.close().unwrap();
        assert_eq!(stats.written, 1_000);
        assert_eq!(store.row_count(EventKind::Transaction).unwrap(), 1_000);
    }
}
