//! SQLite record store for a per-origin cache directory.
//!
//! Each origin's cache directory holds one `caches.sqlite` database with a
//! row per cache entry. The usage engine only cares about one column of it:
//! the padding size assigned to each opaque response, whose sum is the
//! authoritative padding total for the origin whenever the on-disk padding
//! file cannot be trusted.

mod db;
pub mod error;
mod repo;

pub use crate::db::{ConnectOptions, DATABASE_FILE_NAME, Database, WAL_FILE_NAME};
pub use crate::repo::{NewEntry, Repository};
