//! Error types for the ingestion pipeline.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Enqueue attempted after the pipeline was closed. Producers must stop.
    #[error("event queue is closed")]
    ClosedQueue,

    /// Record failed structural validation.
    #[error("validation error: {0}")]
    Validation(#[from] wirespy_core::Error),

    /// Transient store failure; the write is retried.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call exceeded its deadline; retried like `StoreUnavailable`.
    #[error("store call timed out after {0:?}")]
    StoreTimeout(Duration),

    /// Non-transient database error (constraint violation, bad SQL, ...).
    #[error("database error: {0}")]
    Database(String),

    /// ClickHouse error.
    #[error("ClickHouse error: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    /// Misconfiguration detected at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl Error {
    /// Whether a failed store call is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(_) | Self::StoreTimeout(_) => true,
            // Network and server-side hiccups; schema or row errors are not.
            Self::ClickHouse(e) => matches!(
                e,
                clickhouse::error::Error::Network(_) | clickhouse::error::Error::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            // Contention, or a disk that may come back; anything else is final.
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen,
            ) => Self::StoreUnavailable(e.to_string()),
            _ => Self::Database(e.to_string()),
        }
    }
}
