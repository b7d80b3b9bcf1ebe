//! wirespy ingestion pipeline.
//!
//! Takes high-volume event streams observed on a peer-to-peer network and
//! persists them to a durable store while bounding memory, blocking
//! producers under load, and capping repeated observations of the same
//! block or transaction.
//!
//! # Modules
//!
//! - [`pipeline`] - Queues, duplicate suppression, batching, and the ingestion loop
//! - [`store`] - The [`Store`] trait with SQLite and ClickHouse adapters
//! - [`source`] - Event source adapters (JSONL replay)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Producers    │  (capture hooks, JSONL replay)
//! └────────┬────────┘
//!          │ IngestHandle::enqueue (blocks when full)
//!          ▼
//! ┌─────────────────┐
//! │   EventQueues   │  one bounded queue per event kind
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Ingestion loop  │  suppress duplicates, batch, write through, upsert
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Store      │  SQLite or ClickHouse
//! └─────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod store;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use retry::RetryPolicy;

pub use pipeline::{BatchAccumulator, DuplicateSuppressor, IngestHandle, IngestStats, Pipeline};

pub use source::{EventSource, JsonlConfig, JsonlSource, SourceStats};

pub use store::{ClickHouseConfig, ClickHouseStore, SqliteStore, Store, UpsertOutcome};
