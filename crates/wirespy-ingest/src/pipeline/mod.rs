//! The bounded, deduplicating ingestion pipeline.
//!
//! - [`EventQueues`] - one bounded queue per event kind, blocking producers when full
//! - [`DuplicateSuppressor`] - caps persisted observations per hash
//! - [`BatchAccumulator`] - buffers high-volume kinds into batch inserts
//! - [`Pipeline`] - the single ingestion loop tying them to a [`Store`](crate::store::Store)
//!
//! # Architecture
//!
//! ```text
//! producers ─enqueue─► [peer | block | tx | tx content] queues
//!                                   │ select
//!                                   ▼
//!                            ingestion loop
//!                 suppress ─► accumulate | write through | upsert
//!                                   │
//!                                   ▼
//!                                 Store
//! ```
//!
//! | Kind                    | Suppressed | Write policy           |
//! |-------------------------|------------|------------------------|
//! | peer sighting           | no         | write-through          |
//! | block announcement      | by hash    | batched                |
//! | transaction announcement| by hash    | batched                |
//! | transaction content     | no         | upsert, ignore conflict|

mod accumulator;
mod ingest;
mod queue;
mod suppressor;

pub use accumulator::BatchAccumulator;
pub use ingest::{IngestHandle, IngestStats, Pipeline};
pub use queue::{EventQueues, Polled, QueueReceivers, event_queues};
pub use suppressor::DuplicateSuppressor;
