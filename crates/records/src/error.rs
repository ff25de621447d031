//! Record Store Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A record store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for record store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// The database file does not exist (a brand-new origin).
    #[display("database not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A stored value is out of range for its column.
    #[display("invalid record data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY surfaces as a generic database error after the busy
        // timeout; another attempt may find the writer gone.
        matches!(self, Self::Database)
    }
}
