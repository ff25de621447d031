//! Errors raised by storage backends.
//!
//! Callers in the usage engine mostly care about one distinction: whether an
//! entry was simply not there (a benign race with a concurrent delete) or the
//! filesystem actually failed. See [`ErrorKind::is_not_found`].

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// Storage error; `exn` records where it was raised.
pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied by the operating system
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Target of a create-only operation is already there
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains NUL or climbs out of the backend root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// The backend has no local filesystem path to hand out (e.g. in-memory)
    #[display("backend `{_0}` is not backed by the local filesystem")]
    NotLocal(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendError(_))
    }

    /// Returns `true` if the error means the entry simply isn't there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
