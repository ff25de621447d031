//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configuration source could not be read or parsed.
    #[display("could not load configuration")]
    Load,
    /// An explicitly requested configuration file doesn't exist.
    #[display("configuration file not found: {}", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    /// A value was read but is not acceptable.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
    /// Configuration files must be TOML, YAML or JSON.
    #[display("unsupported configuration file: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// No storage root was configured and the platform has no data directory.
    #[display("could not determine a storage root")]
    NoStorageRoot,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
