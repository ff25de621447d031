//! Origin identity and on-disk naming.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::path::PathBuf;

/// Which persistence bucket an origin's data lives in.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceType {
    #[display("persistent")]
    Persistent,
    #[display("temporary")]
    Temporary,
    #[display("default")]
    Default,
}

impl PersistenceType {
    /// Directory under the storage root holding this bucket.
    pub const fn directory_name(&self) -> &'static str {
        match self {
            Self::Persistent => "permanent",
            Self::Temporary => "temporary",
            Self::Default => "default",
        }
    }
}

/// Storage client subsystems sharing an origin directory.
///
/// Only the cache is modelled here; the authority keys cached usage by client
/// so that other subsystems could be added without changing its interface.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientType {
    #[display("cache")]
    Cache,
}

impl ClientType {
    pub const fn directory_name(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
        }
    }
}

/// Identifier of a directory lock held by a cache context.
pub type DirectoryLockId = i64;

/// Identifier of a content process talking to the cache.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentParentId(pub u64);

/// A storage origin: the origin string plus its persistence bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OriginMetadata {
    origin: String,
    persistence: PersistenceType,
}

impl OriginMetadata {
    /// Characters that can't appear in a file name on at least one platform.
    const ILLEGAL_FILE_NAME_CHARS: [char; 9] = [':', '/', '\\', '?', '*', '"', '<', '>', '|'];

    pub fn new(origin: impl Into<String>, persistence: PersistenceType) -> Result<Self> {
        let origin = origin.into();
        if origin.is_empty() || origin.contains('\0') || origin.chars().all(|c| c == '.') {
            exn::bail!(ErrorKind::InvalidOrigin(origin));
        }
        Ok(Self { origin, persistence })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn persistence(&self) -> PersistenceType {
        self.persistence
    }

    /// Same origin, different persistence bucket.
    pub fn with_persistence(&self, persistence: PersistenceType) -> Self {
        Self { origin: self.origin.clone(), persistence }
    }

    /// Origin string made safe for use as a single path component.
    ///
    /// ```
    /// use cachemeter_quota::{OriginMetadata, PersistenceType};
    ///
    /// let origin = OriginMetadata::new("https://example.com:8443", PersistenceType::Default).unwrap();
    /// assert_eq!(origin.directory_name(), "https+++example.com+8443");
    /// ```
    pub fn directory_name(&self) -> String {
        self.origin.replace(Self::ILLEGAL_FILE_NAME_CHARS, "+")
    }

    /// `<persistence>/<sanitized origin>`, relative to the storage root.
    pub fn relative_directory(&self) -> PathBuf {
        PathBuf::from(self.persistence.directory_name()).join(self.directory_name())
    }
}
