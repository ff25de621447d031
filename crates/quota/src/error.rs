//! Usage Engine Error Types
//!
//! Uses [`exn`] for automatic location tracking and error tree construction.
//! Failures from the filesystem and the record store are raised as
//! [`ErrorKind::Storage`] and [`ErrorKind::Records`] with the collaborator's
//! own error kept underneath.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A usage engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for usage engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the failure of a usage or padding operation.
///
/// ### Expected Conditions
/// - [`ErrorKind::NotFound`]: no padding file (yet). Callers map this to a
///   default value.
/// - [`ErrorKind::Corrupt`]: a padding file that can't be decoded. Callers
///   fall back to recomputing from the record store.
///
/// ### Cancellation
/// - [`ErrorKind::Aborted`] and [`ErrorKind::ShuttingDown`], see
///   [`ErrorKind::is_abort`].
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`], [`ErrorKind::Records`], [`ErrorKind::Quota`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("corrupt padding file: {}", _0.display())]
    Corrupt(#[error(not(source))] PathBuf),
    /// The caller's cancel flag was observed mid-walk.
    #[display("operation aborted")]
    Aborted,
    /// The quota authority started shutting down mid-walk.
    #[display("quota authority is shutting down")]
    ShuttingDown,
    /// A filesystem operation failed.
    #[display("storage error")]
    Storage,
    /// Opening or querying the record store failed.
    #[display("record store error")]
    Records,
    /// The quota authority rejected or failed a request.
    #[display("quota authority error")]
    Quota,
    #[display("invalid origin: {_0:?}")]
    InvalidOrigin(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Records)
    }

    /// Returns `true` for both flavours of cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted | Self::ShuttingDown)
    }
}
