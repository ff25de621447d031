use super::{MAX_PADDING, PaddingFile, decode, encode};
use crate::error::{ErrorKind, Result};
use cachemeter_storage::StorageBackend;
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

/// Whether the given padding file exists.
///
/// Never fails: an error while checking counts as "doesn't exist".
pub async fn exists(backend: &dyn StorageBackend, dir: &Path, which: PaddingFile) -> bool {
    let path = which.path_in(dir);
    match backend.exists(&path).await {
        Ok(exists) => exists,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = ?e, "Could not check for padding file");
            false
        },
    }
}

/// Read the committed padding total of `dir`.
///
/// Fails with [`ErrorKind::NotFound`] when there is no `.padding` file and
/// with [`ErrorKind::Corrupt`] when it doesn't hold exactly one non-negative
/// 64-bit value.
pub async fn get(backend: &dyn StorageBackend, dir: &Path) -> Result<u64> {
    let path = PaddingFile::Final.path_in(dir);
    let bytes = match backend.read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => exn::bail!(ErrorKind::NotFound(path)),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
    };
    decode(&bytes).ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt(path)))
}

pub(crate) async fn write(backend: &dyn StorageBackend, dir: &Path, which: PaddingFile, padding: u64) -> Result<()> {
    let path = which.path_in(dir);
    let bytes = encode(padding, &path)?;
    backend.write(&path, &bytes).await.or_raise(|| ErrorKind::Storage)
}

/// Write a zero total as the committed padding file, unless one exists.
pub async fn init(backend: &dyn StorageBackend, dir: &Path) -> Result<()> {
    if exists(backend, dir, PaddingFile::Final).await {
        return Ok(());
    }
    write(backend, dir, PaddingFile::Final, 0).await
}

/// Remove the given padding file. Removing a file that isn't there succeeds.
pub async fn delete(backend: &dyn StorageBackend, dir: &Path, which: PaddingFile) -> Result<()> {
    match backend.remove_file(&which.path_in(dir)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
    }
}

/// What [`update_temporary`] left in `.padding-tmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedPadding {
    /// The new total, ready for [`finalize_write`] once the records commit.
    Total(u64),
    /// The committed total couldn't be used. The temporary file only marks
    /// the padding as unknown; the total has to be summed from the record
    /// store after the commit.
    Unknown,
}

/// Stage a new padding total in `.padding-tmp`.
///
/// The new total is the committed one plus `increase` minus `decrease`. When
/// the committed total can't be used (a temporary file was already there, the
/// final file is unreadable, or applying the deltas would leave the valid
/// range) the final file is deleted and the padding is staged as
/// [`StagedPadding::Unknown`]. The record store can't be summed here: the
/// pending commit isn't visible to it yet.
#[instrument(level = "debug", skip(backend, dir), fields(dir = %dir.display()))]
pub async fn update_temporary(
    backend: &dyn StorageBackend,
    dir: &Path,
    increase: u64,
    decrease: u64,
    temporary_exists: bool,
) -> Result<StagedPadding> {
    let committed = if temporary_exists { None } else { get(backend, dir).await.ok() };
    let padding = committed.and_then(|current| {
        let padding = current.checked_add(increase).and_then(|p| p.checked_sub(decrease)).filter(|p| *p <= MAX_PADDING);
        if padding.is_none() {
            tracing::warn!(current, increase, decrease, "Tracked padding size is out of sync");
        }
        padding
    });
    match padding {
        Some(padding) => {
            write(backend, dir, PaddingFile::Temporary, padding).await?;
            Ok(StagedPadding::Total(padding))
        },
        None => {
            // Nobody may trust the old total while the records change.
            delete(backend, dir, PaddingFile::Final).await?;
            write(backend, dir, PaddingFile::Temporary, 0).await?;
            Ok(StagedPadding::Unknown)
        },
    }
}

/// Commit the staged total by renaming `.padding-tmp` over `.padding`.
pub async fn finalize_write(backend: &dyn StorageBackend, dir: &Path) -> Result<()> {
    backend
        .rename(&PaddingFile::Temporary.path_in(dir), &PaddingFile::Final.path_in(dir))
        .await
        .or_raise(|| ErrorKind::Storage)
}
