//! Error types for wirespy event records.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating or decoding event records.
#[derive(Error, Debug)]
pub enum Error {
    /// A record field is missing or malformed.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Hex decoding error.
    #[error("hex decode error: {0}")]
    HexDecode(String),
}
