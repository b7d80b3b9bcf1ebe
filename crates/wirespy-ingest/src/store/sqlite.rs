//! SQLite store adapter.
//!
//! One connection, guarded by a mutex and shared with blocking tasks.
//! Every call runs on tokio's blocking pool so the caller's deadline can
//! fire even while SQLite is waiting on a lock.

use super::schema;
use super::{Store, UpsertOutcome, key_column, table_name};
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wirespy_core::{DisconnectReason, Event, EventKind, PeerHeartbeat, Signature, TransactionContent};

/// SQLite-backed [`Store`].
///
/// Cloning is cheap and shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database file.
    ///
    /// `busy_timeout` bounds how long SQLite itself waits on a locked
    /// database before reporting `SQLITE_BUSY`.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening SQLite store at {}", path.display());

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            Error::Config(format!("Failed to open SQLite at {}: {}", path.display(), e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Config(format!("Failed to set PRAGMA: {}", e)))?;
        conn.busy_timeout(busy_timeout)?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Config(format!("Failed to open in-memory SQLite: {}", e)))?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Total rows stored for a kind.
    pub fn row_count(&self, kind: EventKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table_name(kind));
        let count = self.conn.lock().query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Read back a stored transaction body.
    pub fn transaction_content(&self, hash: &str) -> Result<Option<TransactionContent>> {
        let conn = self.conn.lock();
        let content = conn
            .query_row(
                "SELECT hash, sender, recipient, nonce, value, gas_price, gas, data,
                        sig_v, sig_r, sig_s
                 FROM transaction_contents WHERE hash = ?1",
                params![hash],
                |row| {
                    let v: Option<String> = row.get(8)?;
                    let r: Option<String> = row.get(9)?;
                    let s: Option<String> = row.get(10)?;
                    let signature = match (v, r, s) {
                        (Some(v), Some(r), Some(s)) => Some(Signature { v, r, s }),
                        _ => None,
                    };

                    Ok(TransactionContent {
                        hash: row.get(0)?,
                        from: row.get(1)?,
                        to: row.get(2)?,
                        nonce: row.get::<_, i64>(3)? as u64,
                        value: row.get(4)?,
                        gas_price: row.get(5)?,
                        gas: row.get::<_, i64>(6)? as u64,
                        data_hex: row.get(7)?,
                        signature,
                    })
                },
            )
            .optional()?;
        Ok(content)
    }

    /// Disconnect reasons recorded for a peer, oldest first.
    pub fn disconnect_reasons(&self, peer_id: &str) -> Result<Vec<DisconnectReason>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT reason FROM peer_disconnects WHERE peer_id = ?1 ORDER BY id")?;
        let reasons = stmt
            .query_map(params![peer_id], |row| row.get::<_, i64>(0))?
            .map(|code| code.map(|code| DisconnectReason::from(code as u64)))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reasons)
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::StoreUnavailable(format!("SQLite task failed: {}", e)))?
    }
}

fn insert_batch_blocking(conn: &mut Connection, kind: EventKind, events: &[Event]) -> Result<()> {
    let tx = conn.transaction()?;

    {
        let sql = match kind {
            EventKind::Peer => {
                "INSERT INTO peer_sightings (peer_id, version, address, observed_at)
                 VALUES (?1, ?2, ?3, ?4)"
            }
            EventKind::Block => {
                "INSERT INTO block_announcements (peer_id, hash, block_number, code, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            }
            EventKind::Transaction => {
                "INSERT INTO transaction_announcements (peer_id, hash, code, observed_at)
                 VALUES (?1, ?2, ?3, ?4)"
            }
            EventKind::TransactionContent => {
                "INSERT OR IGNORE INTO transaction_contents
                    (hash, sender, recipient, nonce, value, gas_price, gas, data, sig_v, sig_r, sig_s)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            }
            EventKind::Hello => {
                "INSERT INTO peer_hellos
                    (peer_id, name, caps, enode, enr, local_address, remote_address,
                     inbound, trusted, is_static, observed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            }
            EventKind::Disconnect => {
                "INSERT INTO peer_disconnects (peer_id, reason, observed_at) VALUES (?1, ?2, ?3)"
            }
            EventKind::Ping => "INSERT INTO peer_pings (peer_id, observed_at) VALUES (?1, ?2)",
            EventKind::Pong => "INSERT INTO peer_pongs (peer_id, observed_at) VALUES (?1, ?2)",
        };
        let mut stmt = tx.prepare_cached(sql)?;

        for event in events {
            match (kind, event) {
                (EventKind::Peer, Event::Peer(peer)) => {
                    stmt.execute(params![
                        peer.peer_id,
                        peer.version,
                        peer.address,
                        peer.observed_at.timestamp_millis(),
                    ])?;
                }
                (EventKind::Block, Event::Block(block)) => {
                    stmt.execute(params![
                        block.peer_id,
                        block.hash,
                        block.number as i64,
                        block.code.code() as i64,
                        block.observed_at.timestamp_millis(),
                    ])?;
                }
                (EventKind::Transaction, Event::Transaction(ann)) => {
                    stmt.execute(params![
                        ann.peer_id,
                        ann.hash,
                        ann.code.code() as i64,
                        ann.observed_at.timestamp_millis(),
                    ])?;
                }
                (EventKind::TransactionContent, Event::TransactionContent(content)) => {
                    execute_content(&mut stmt, content)?;
                }
                (EventKind::Hello, Event::Hello(hello)) => {
                    stmt.execute(params![
                        hello.peer_id,
                        hello.name,
                        hello.caps.join(","),
                        hello.enode,
                        hello.enr,
                        hello.local_address,
                        hello.remote_address,
                        hello.inbound,
                        hello.trusted,
                        hello.is_static,
                        hello.observed_at.timestamp_millis(),
                    ])?;
                }
                (EventKind::Disconnect, Event::Disconnect(disconnect)) => {
                    stmt.execute(params![
                        disconnect.peer_id,
                        disconnect.reason.code() as i64,
                        disconnect.observed_at.timestamp_millis(),
                    ])?;
                }
                (EventKind::Ping, Event::Ping(beat)) | (EventKind::Pong, Event::Pong(beat)) => {
                    execute_heartbeat(&mut stmt, beat)?;
                }
                (kind, other) => {
                    return Err(Error::Database(format!(
                        "{} record in a {} batch",
                        other.kind(),
                        kind
                    )));
                }
            }
        }
    }

    tx.commit()?;
    Ok(())
}

fn execute_content(stmt: &mut rusqlite::Statement<'_>, content: &TransactionContent) -> Result<usize> {
    let (v, r, s) = match &content.signature {
        Some(sig) => (Some(&sig.v), Some(&sig.r), Some(&sig.s)),
        None => (None, None, None),
    };

    let changed = stmt.execute(params![
        content.hash,
        content.from,
        content.to,
        content.nonce as i64,
        content.value,
        content.gas_price,
        content.gas as i64,
        content.data_hex,
        v,
        r,
        s,
    ])?;
    Ok(changed)
}

fn execute_heartbeat(stmt: &mut rusqlite::Statement<'_>, beat: &PeerHeartbeat) -> Result<()> {
    stmt.execute(params![beat.peer_id, beat.observed_at.timestamp_millis()])?;
    Ok(())
}

impl Store for SqliteStore {
    async fn insert_batch(&self, kind: EventKind, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let events = events.to_vec();
        self.with_conn(move |conn| insert_batch_blocking(conn, kind, &events))
            .await
    }

    async fn upsert_ignore_conflict(&self, content: &TransactionContent) -> Result<UpsertOutcome> {
        let content = content.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO transaction_contents
                    (hash, sender, recipient, nonce, value, gas_price, gas, data, sig_v, sig_r, sig_s)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            let changed = execute_content(&mut stmt, &content)?;
            Ok(if changed == 0 {
                UpsertOutcome::ConflictIgnored
            } else {
                UpsertOutcome::Inserted
            })
        })
        .await
    }

    async fn count_by_key(&self, kind: EventKind, key: &str) -> Result<i64> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?1",
                table_name(kind),
                key_column(kind)
            );
            let count = conn.query_row(&sql, params![key], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            if one == 1 {
                Ok(())
            } else {
                Err(Error::Database("unexpected health check result".to_string()))
            }
        })
        .await
    }
}
