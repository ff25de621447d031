use super::{PaddingFile, delete, exists, get, write};
use crate::error::{ErrorKind, Result};
use cachemeter_records::error::ErrorKind as RecordsErrorKind;
use cachemeter_records::{ConnectOptions, DATABASE_FILE_NAME, Database, Repository};
use cachemeter_storage::StorageBackend;
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

/// Work out the padding total of `dir`, repairing the padding files if asked.
///
/// A committed `.padding` file is used as-is unless a `.padding-tmp` file sits
/// next to it. Otherwise the total is summed from the record store. With
/// `must_restore` the recomputed total is then committed as the new `.padding`
/// file and any temporary file is removed; without it the total is only
/// returned.
pub async fn restore(backend: &dyn StorageBackend, dir: &Path, records: &Repository, must_restore: bool) -> Result<u64> {
    if !exists(backend, dir, PaddingFile::Temporary).await {
        match get(backend, dir).await {
            Ok(padding) => return Ok(padding),
            Err(e) if matches!(&*e, ErrorKind::Corrupt(_)) => {
                tracing::warn!(dir = %dir.display(), "Padding file is corrupt, recomputing from records");
            },
            Err(e) if matches!(&*e, ErrorKind::NotFound(_)) => {},
            Err(e) => return Err(e),
        }
    }
    let padding = records.overall_padding_size().await.or_raise(|| ErrorKind::Records)?;
    if must_restore {
        delete(backend, dir, PaddingFile::Final).await?;
        write(backend, dir, PaddingFile::Final, padding).await?;
        delete(backend, dir, PaddingFile::Temporary).await?;
        tracing::info!(dir = %dir.display(), padding, "Restored padding file from records");
    }
    Ok(padding)
}

/// [`restore`] against the origin's own `caches.sqlite`.
///
/// An origin without a record store has never stored anything, so its padding
/// is zero. The store's schema is brought up to date before it is read.
#[instrument(level = "debug", skip(backend, dir, options), fields(dir = %dir.display()))]
pub async fn padding_size_from_records(
    backend: &dyn StorageBackend,
    dir: &Path,
    options: &ConnectOptions,
    must_restore: bool,
) -> Result<u64> {
    let db_path = dir.join(DATABASE_FILE_NAME);
    if !backend.exists(&db_path).await.or_raise(|| ErrorKind::Storage)? {
        return Ok(0);
    }
    let local = backend.local_path(&db_path).or_raise(|| ErrorKind::Storage)?;
    let db = match Database::open_existing(&local, options).await {
        Ok(db) => db,
        // Removed between the existence check and opening it.
        Err(e) if matches!(&*e, RecordsErrorKind::NotFound(_)) => return Ok(0),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Records),
    };
    let result = restore(backend, dir, &Repository::from(&db), must_restore).await;
    db.close().await;
    result
}
