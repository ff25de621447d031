//! Storage backend trait and implementations.
//!
//! The [`StorageBackend`] trait is the only way the usage engine touches the
//! disk. [`LocalBackend`] maps it onto the local filesystem, and the in-memory
//! [`MockBackend`] (behind the `mock` feature) exists so other crates can
//! reproduce awkward filesystem states in their tests.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;

pub(crate) type PathStream<'a> = Pin<Box<dyn Stream<Item = Result<PathBuf>> + Send + 'a>>;

/// What a path points at, at the moment it was inspected.
///
/// Directory walks enumerate first and inspect later, so an entry can vanish
/// in between. That shows up as [`EntryKind::Missing`] rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Missing,
}

/// Unified interface for storage backends.
///
/// All operations are asynchronous. Paths are relative to the storage root
/// and implementations must validate them with
/// [`validate_path`](crate::validate_path) before use.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cachemeter_storage::{EntryKind, StorageBackend, error::Result};
///
/// async fn database_size(backend: &dyn StorageBackend, cache_dir: &Path) -> Result<u64> {
///     let path = cache_dir.join("caches.sqlite");
///     match backend.entry_kind(&path).await? {
///         EntryKind::File => backend.size(&path).await,
///         _ => Ok(0),
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Absolute location of `path` on the local filesystem.
    ///
    /// Needed by collaborators that open files themselves (the SQLite record
    /// store). Backends that don't live on disk return
    /// [`NotLocal`](crate::error::ErrorKind::NotLocal).
    fn local_path(&self, path: &Path) -> Result<PathBuf>;

    /// Stream the immediate children of a directory.
    ///
    /// Yields paths relative to the storage root, in whatever order the
    /// backend enumerates them. A directory that doesn't exist yields nothing.
    fn read_dir<'a>(&'a self, dir: &'a Path) -> PathStream<'a>;

    /// Collect the immediate children of a directory into a [`Vec`].
    async fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        self.read_dir(dir).try_collect().await
    }

    /// Inspect what a path currently points at.
    async fn entry_kind(&self, path: &Path) -> Result<EntryKind>;

    /// Check whether a file or directory exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Size of a file in bytes.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn size(&self, path: &Path) -> Result<u64>;

    /// Read a whole file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create or overwrite a file, creating parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Atomically rename a file, replacing the destination if it exists.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// does not exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a single file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory and everything below it.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the
    /// directory does not exist.
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;
}
