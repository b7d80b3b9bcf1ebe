//! ClickHouse store adapter.
//!
//! Each event kind maps to one table with a matching [`Row`] struct.
//! Batches go through the client's inserter (one INSERT per batch).
//! Timestamps are `DateTime64(3)` columns written as Unix milliseconds.
//!
//! ClickHouse has no unique constraints, so insert-or-ignore for transaction
//! bodies is an existence check followed by an insert. The table is a
//! `ReplacingMergeTree` keyed on hash, which collapses any duplicate a race
//! lets through.

use super::{Store, UpsertOutcome, key_column, table_name};
use crate::{Error, Result};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};
use wirespy_core::{
    BlockAnnouncement, Event, EventKind, PeerDisconnect, PeerHeartbeat, PeerHello, PeerSighting,
    TransactionAnnouncement, TransactionContent,
};

/// Connection settings for the ClickHouse store.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// ClickHouse server URL (e.g., "http://localhost:8123")
    pub url: String,

    /// Database name
    pub database: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "wirespy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PeerSightingRow {
    pub peer_id: String,
    pub version: u32,
    pub address: String,
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct BlockAnnouncementRow {
    pub peer_id: String,
    pub hash: String,
    pub block_number: u64,
    pub code: u64,
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct TransactionAnnouncementRow {
    pub peer_id: String,
    pub hash: String,
    pub code: u64,
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct TransactionContentRow {
    pub hash: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub nonce: u64,
    pub value: String,
    pub gas_price: String,
    pub gas: u64,
    pub data: String,
    pub sig_v: Option<String>,
    pub sig_r: Option<String>,
    pub sig_s: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PeerHelloRow {
    pub peer_id: String,
    pub name: String,
    pub caps: Vec<String>,
    pub enode: String,
    pub enr: String,
    pub local_address: String,
    pub remote_address: String,
    pub inbound: bool,
    pub trusted: bool,
    pub is_static: bool,
    pub observed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PeerDisconnectRow {
    pub peer_id: String,
    pub reason: u64,
    pub observed_at: i64,
}

/// Shared by the ping and pong tables.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct PeerHeartbeatRow {
    pub peer_id: String,
    pub observed_at: i64,
}

impl From<&PeerSighting> for PeerSightingRow {
    fn from(peer: &PeerSighting) -> Self {
        Self {
            peer_id: peer.peer_id.clone(),
            version: peer.version,
            address: peer.address.clone(),
            observed_at: peer.observed_at.timestamp_millis(),
        }
    }
}

impl From<&BlockAnnouncement> for BlockAnnouncementRow {
    fn from(block: &BlockAnnouncement) -> Self {
        Self {
            peer_id: block.peer_id.clone(),
            hash: block.hash.clone(),
            block_number: block.number,
            code: block.code.code(),
            observed_at: block.observed_at.timestamp_millis(),
        }
    }
}

impl From<&TransactionAnnouncement> for TransactionAnnouncementRow {
    fn from(ann: &TransactionAnnouncement) -> Self {
        Self {
            peer_id: ann.peer_id.clone(),
            hash: ann.hash.clone(),
            code: ann.code.code(),
            observed_at: ann.observed_at.timestamp_millis(),
        }
    }
}

impl From<&TransactionContent> for TransactionContentRow {
    fn from(content: &TransactionContent) -> Self {
        let sig = content.signature.as_ref();
        Self {
            hash: content.hash.clone(),
            sender: content.from.clone(),
            recipient: content.to.clone(),
            nonce: content.nonce,
            value: content.value.clone(),
            gas_price: content.gas_price.clone(),
            gas: content.gas,
            data: content.data_hex.clone(),
            sig_v: sig.map(|s| s.v.clone()),
            sig_r: sig.map(|s| s.r.clone()),
            sig_s: sig.map(|s| s.s.clone()),
        }
    }
}

impl From<&PeerHello> for PeerHelloRow {
    fn from(hello: &PeerHello) -> Self {
        Self {
            peer_id: hello.peer_id.clone(),
            name: hello.name.clone(),
            caps: hello.caps.clone(),
            enode: hello.enode.clone(),
            enr: hello.enr.clone(),
            local_address: hello.local_address.clone(),
            remote_address: hello.remote_address.clone(),
            inbound: hello.inbound,
            trusted: hello.trusted,
            is_static: hello.is_static,
            observed_at: hello.observed_at.timestamp_millis(),
        }
    }
}

impl From<&PeerDisconnect> for PeerDisconnectRow {
    fn from(disconnect: &PeerDisconnect) -> Self {
        Self {
            peer_id: disconnect.peer_id.clone(),
            reason: disconnect.reason.code(),
            observed_at: disconnect.observed_at.timestamp_millis(),
        }
    }
}

impl From<&PeerHeartbeat> for PeerHeartbeatRow {
    fn from(beat: &PeerHeartbeat) -> Self {
        Self {
            peer_id: beat.peer_id.clone(),
            observed_at: beat.observed_at.timestamp_millis(),
        }
    }
}

/// Table definitions, one statement each.
const CREATE_TABLES: [&str; 8] = [
    "CREATE TABLE IF NOT EXISTS peer_sightings (
        peer_id String,
        version UInt32,
        address String,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (peer_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS block_announcements (
        peer_id String,
        hash String,
        block_number UInt64,
        code UInt64,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (hash, observed_at)",
    "CREATE TABLE IF NOT EXISTS transaction_announcements (
        peer_id String,
        hash String,
        code UInt64,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (hash, observed_at)",
    "CREATE TABLE IF NOT EXISTS transaction_contents (
        hash String,
        sender String,
        recipient Nullable(String),
        nonce UInt64,
        value String,
        gas_price String,
        gas UInt64,
        data String,
        sig_v Nullable(String),
        sig_r Nullable(String),
        sig_s Nullable(String)
    ) ENGINE = ReplacingMergeTree ORDER BY hash",
    "CREATE TABLE IF NOT EXISTS peer_hellos (
        peer_id String,
        name String,
        caps Array(String),
        enode String,
        enr String,
        local_address String,
        remote_address String,
        inbound Bool,
        trusted Bool,
        is_static Bool,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (peer_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS peer_disconnects (
        peer_id String,
        reason UInt64,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (peer_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS peer_pings (
        peer_id String,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (peer_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS peer_pongs (
        peer_id String,
        observed_at DateTime64(3)
    ) ENGINE = MergeTree ORDER BY (peer_id, observed_at)",
];

/// ClickHouse-backed [`Store`].
#[derive(Clone)]
pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseStore {
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database);

        tracing::info!(
            "ClickHouse store initialized: url={}, database={}",
            config.url,
            config.database
        );

        Self { client, config }
    }

    /// Create the database tables if they do not exist yet.
    pub async fn create_tables(&self) -> Result<()> {
        for ddl in CREATE_TABLES {
            self.client.query(ddl).execute().await?;
        }
        tracing::info!("ClickHouse tables ready in {}", self.config.database);
        Ok(())
    }

    async fn insert_rows<T>(&self, table: &str, rows: &[T]) -> Result<()>
    where
        T: Row + Serialize,
    {
        let mut inserter = self.client.insert::<T>(table)?;
        for row in rows {
            inserter.write(row).await?;
        }
        inserter.end().await?;
        Ok(())
    }
}

/// Convert a batch into rows of one type, rejecting records of another kind.
fn rows_of<'a, T, F>(kind: EventKind, events: &'a [Event], mut convert: F) -> Result<Vec<T>>
where
    F: FnMut(&'a Event) -> Option<T>,
{
    events
        .iter()
        .map(|event| {
            convert(event).ok_or_else(|| {
                Error::Database(format!("{} record in a {} batch", event.kind(), kind))
            })
        })
        .collect()
}

impl Store for ClickHouseStore {
    async fn insert_batch(&self, kind: EventKind, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let table = table_name(kind);
        match kind {
            EventKind::Peer => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Peer(p) => Some(PeerSightingRow::from(p)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Block => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Block(b) => Some(BlockAnnouncementRow::from(b)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Transaction => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Transaction(t) => Some(TransactionAnnouncementRow::from(t)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::TransactionContent => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::TransactionContent(c) => Some(TransactionContentRow::from(c)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Hello => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Hello(h) => Some(PeerHelloRow::from(h)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Disconnect => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Disconnect(d) => Some(PeerDisconnectRow::from(d)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Ping => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Ping(p) => Some(PeerHeartbeatRow::from(p)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
            EventKind::Pong => {
                let rows = rows_of(kind, events, |e| match e {
                    Event::Pong(p) => Some(PeerHeartbeatRow::from(p)),
                    _ => None,
                })?;
                self.insert_rows(table, &rows).await
            }
        }
    }

    async fn upsert_ignore_conflict(&self, content: &TransactionContent) -> Result<UpsertOutcome> {
        if self
            .count_by_key(EventKind::TransactionContent, &content.hash)
            .await?
            > 0
        {
            return Ok(UpsertOutcome::ConflictIgnored);
        }

        let row = TransactionContentRow::from(content);
        self.insert_rows(table_name(EventKind::TransactionContent), &[row])
            .await?;
        Ok(UpsertOutcome::Inserted)
    }

    async fn count_by_key(&self, kind: EventKind, key: &str) -> Result<i64> {
        let query = format!(
            "SELECT count() FROM {} WHERE {} = ?",
            table_name(kind),
            key_column(kind)
        );
        let count: u64 = self.client.query(&query).bind(key).fetch_one().await?;
        Ok(count as i64)
    }

    async fn health_check(&self) -> Result<()> {
        let result: u8 = self.client.query("SELECT 1").fetch_one().await?;
        if result == 1 {
            Ok(())
        } else {
            Err(Error::StoreUnavailable(format!(
                "unexpected health check result from {}",
                self.config.url
            )))
        }
    }
}
