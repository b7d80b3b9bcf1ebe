//! SQLite schema for captured events.

use crate::{Error, Result};
use rusqlite::Connection;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema.
///
/// Creates all tables on a fresh database and runs any pending migrations.
/// Refuses to open a database written by a newer schema.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        migrate(conn, current_version, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(Error::Config(format!(
            "database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Create all tables for a fresh database.
///
/// Timestamps are Unix milliseconds. Announcements are append-only and may
/// repeat per hash; transaction bodies are unique per hash.
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS peer_sightings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            address TEXT NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS block_announcements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            hash TEXT NOT NULL,
            block_number INTEGER NOT NULL,
            code INTEGER NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transaction_announcements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            hash TEXT NOT NULL,
            code INTEGER NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transaction_contents (
            hash TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            recipient TEXT,
            nonce INTEGER NOT NULL,
            value TEXT NOT NULL,
            gas_price TEXT NOT NULL,
            gas INTEGER NOT NULL,
            data TEXT NOT NULL,
            sig_v TEXT,
            sig_r TEXT,
            sig_s TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_peer_sightings_peer ON peer_sightings(peer_id);
        CREATE INDEX IF NOT EXISTS idx_block_announcements_hash ON block_announcements(hash);
        CREATE INDEX IF NOT EXISTS idx_transaction_announcements_hash ON transaction_announcements(hash);
        "#,
    )?;

    create_session_tables(conn)
}

/// RLPx session messages, one row per message.
///
/// Capabilities are stored comma-joined; flags are 0/1.
fn create_session_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS peer_hellos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            name TEXT NOT NULL,
            caps TEXT NOT NULL,
            enode TEXT NOT NULL,
            enr TEXT NOT NULL,
            local_address TEXT NOT NULL,
            remote_address TEXT NOT NULL,
            inbound INTEGER NOT NULL,
            trusted INTEGER NOT NULL,
            is_static INTEGER NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peer_disconnects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            reason INTEGER NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peer_pings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS peer_pongs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            peer_id TEXT NOT NULL,
            observed_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_peer_hellos_peer ON peer_hellos(peer_id);
        CREATE INDEX IF NOT EXISTS idx_peer_disconnects_peer ON peer_disconnects(peer_id);
        "#,
    )?;

    Ok(())
}

/// Run migrations from one version to another.
fn migrate(conn: &Connection, from: i32, to: i32) -> Result<()> {
    for version in from..to {
        if version == 1 {
            migrate_v1_to_v2(conn)?;
        }
    }
    set_schema_version(conn, to)?;
    Ok(())
}

/// Migrate from v1 to v2: add the RLPx session tables.
fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    tracing::info!("Migrating SQLite schema from v1 to v2");
    create_session_tables(conn)
}
