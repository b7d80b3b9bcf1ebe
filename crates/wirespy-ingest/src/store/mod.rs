//! Durable sinks for ingested events.
//!
//! The ingestion loop talks to storage only through the [`Store`] trait.
//! Adapters own the mapping from event records to their row layout:
//!
//! - [`SqliteStore`] - single-file SQLite database, the default sink
//! - [`ClickHouseStore`] - ClickHouse tables for analytics-scale capture

mod clickhouse;
mod schema;
mod sqlite;

pub use self::clickhouse::{ClickHouseConfig, ClickHouseStore};
pub use self::sqlite::SqliteStore;

use crate::Result;
use std::future::Future;
use wirespy_core::{Event, EventKind, TransactionContent};

/// Result of an insert-or-ignore write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created.
    Inserted,
    /// A row with the same hash already existed; nothing was written.
    ConflictIgnored,
}

/// A durable sink for event records.
///
/// Calls come from a single ingestion loop, one at a time.
pub trait Store: Send + 'static {
    /// Insert a batch of records of one kind, all or nothing.
    fn insert_batch(&self, kind: EventKind, events: &[Event]) -> impl Future<Output = Result<()>>;

    /// Insert a transaction body unless one with the same hash exists.
    ///
    /// A duplicate hash is not an error.
    fn upsert_ignore_conflict(
        &self,
        content: &TransactionContent,
    ) -> impl Future<Output = Result<UpsertOutcome>>;

    /// Number of stored records of `kind` whose natural key equals `key`.
    fn count_by_key(&self, kind: EventKind, key: &str) -> impl Future<Output = Result<i64>>;

    /// Verify the store is reachable. Called once before ingestion starts.
    fn health_check(&self) -> impl Future<Output = Result<()>>;
}

/// Table holding records of a kind.
pub(crate) fn table_name(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Peer => "peer_sightings",
        EventKind::Block => "block_announcements",
        EventKind::Transaction => "transaction_announcements",
        EventKind::TransactionContent => "transaction_contents",
        EventKind::Hello => "peer_hellos",
        EventKind::Disconnect => "peer_disconnects",
        EventKind::Ping => "peer_pings",
        EventKind::Pong => "peer_pongs",
    }
}

/// Column holding a kind's natural key.
pub(crate) fn key_column(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Peer
        | EventKind::Hello
        | EventKind::Disconnect
        | EventKind::Ping
        | EventKind::Pong => "peer_id",
        EventKind::Block | EventKind::Transaction | EventKind::TransactionContent => "hash",
    }
}
