//! Filesystem capability for the cache usage engine.
//!
//! Everything the engine knows about disk goes through [`StorageBackend`]:
//! entry kinds, sizes, directory enumeration, small reads/writes for padding
//! files, renames and removals. Paths are always relative to the backend
//! root and validated with [`validate_path`] before use.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::{EntryKind, StorageBackend};
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
