//! Usage walk over an origin's cache directory.
//!
//! ```text
//! <origin>/cache/
//!   caches.sqlite            database usage
//!   caches.sqlite-wal        database usage
//!   caches.sqlite-shm        ignored (also -journal, -mj*, context_open.marker)
//!   .padding, .padding-tmp   ignored (accounted separately)
//!   morgue/
//!     <bucket>/
//!       <body id>.final      body usage
//!       <body id>.tmp        body usage, or removed while initializing
//! ```

use crate::error::{ErrorKind, Result};
use crate::padding::{PADDING_FILE_NAME, PADDING_TMP_FILE_NAME};
use crate::{QuotaAuthority, UsageInfo, reduce};
use cachemeter_records::{DATABASE_FILE_NAME, WAL_FILE_NAME};
use cachemeter_storage::{EntryKind, StorageBackend};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

pub const MORGUE_DIRECTORY_NAME: &str = "morgue";
pub const MARKER_FILE_NAME: &str = "context_open.marker";
const JOURNAL_FILE_NAME: &str = "caches.sqlite-journal";
const SHM_FILE_NAME: &str = "caches.sqlite-shm";
const MASTER_JOURNAL_PREFIX: &str = "caches.sqlite-mj";
const FINAL_BODY_SUFFIX: &str = ".final";
const TMP_BODY_SUFFIX: &str = ".tmp";

pub(crate) struct Walk<'a> {
    pub backend: &'a dyn StorageBackend,
    pub authority: &'a dyn QuotaAuthority,
    pub canceled: &'a AtomicBool,
    /// First-time origin bring-up: orphaned body files may be cleaned up.
    pub initializing: bool,
    /// Count body blobs as database usage instead of file usage.
    pub body_as_database: bool,
}

impl Walk<'_> {
    /// Usage of everything inside the cache directory, padding excluded.
    pub async fn origin_usage(&self, dir: &Path) -> Result<UsageInfo> {
        self.reduce_checked(dir, |entry| self.origin_entry_usage(entry)).await
    }

    /// [`reduce`] that also stops once the quota authority is shutting down.
    async fn reduce_checked<F, Fut>(&self, dir: &Path, mut step: F) -> Result<UsageInfo>
    where
        F: FnMut(PathBuf) -> Fut,
        Fut: Future<Output = Result<UsageInfo>>,
    {
        let authority = self.authority;
        reduce(self.backend, dir, self.canceled, UsageInfo::default(), |entry| {
            let shutting_down = authority.is_shutting_down();
            let usage = step(entry);
            async move {
                if shutting_down {
                    exn::bail!(ErrorKind::ShuttingDown);
                }
                usage.await
            }
        })
        .await
    }

    async fn origin_entry_usage(&self, entry: PathBuf) -> Result<UsageInfo> {
        let name = file_name(&entry);
        match self.backend.entry_kind(&entry).await.or_raise(|| ErrorKind::Storage)? {
            EntryKind::Directory if name == MORGUE_DIRECTORY_NAME => self.body_usage(&entry).await,
            EntryKind::Directory => {
                tracing::warn!(path = %entry.display(), "Unknown cache directory found");
                Ok(UsageInfo::default())
            },
            EntryKind::File => match name.as_str() {
                JOURNAL_FILE_NAME | SHM_FILE_NAME | MARKER_FILE_NAME => Ok(UsageInfo::default()),
                n if n.starts_with(MASTER_JOURNAL_PREFIX) => Ok(UsageInfo::default()),
                DATABASE_FILE_NAME | WAL_FILE_NAME => Ok(UsageInfo::from_database(self.size_if_exists(&entry).await?)),
                PADDING_FILE_NAME | PADDING_TMP_FILE_NAME => Ok(UsageInfo::default()),
                _ => {
                    tracing::warn!(path = %entry.display(), "Unknown cache file found");
                    Ok(UsageInfo::default())
                },
            },
            // Removed by someone else while we were iterating.
            EntryKind::Missing => Ok(UsageInfo::default()),
        }
    }

    async fn body_usage(&self, morgue: &Path) -> Result<UsageInfo> {
        self.reduce_checked(morgue, |bucket| self.bucket_usage(bucket)).await
    }

    async fn bucket_usage(&self, bucket: PathBuf) -> Result<UsageInfo> {
        match self.backend.entry_kind(&bucket).await.or_raise(|| ErrorKind::Storage)? {
            EntryKind::Directory => {},
            EntryKind::File => {
                tracing::warn!(path = %bucket.display(), "Removing stray file from morgue");
                self.remove_best_effort(&bucket, EntryKind::File).await;
                return Ok(UsageInfo::default());
            },
            EntryKind::Missing => return Ok(UsageInfo::default()),
        }
        let usage = self.reduce_checked(&bucket, |file| self.body_file_usage(file)).await?;
        if self.initializing && self.backend.list_dir(&bucket).await.or_raise(|| ErrorKind::Storage)?.is_empty() {
            self.remove_best_effort(&bucket, EntryKind::Directory).await;
        }
        Ok(usage)
    }

    async fn body_file_usage(&self, file: PathBuf) -> Result<UsageInfo> {
        let name = file_name(&file);
        match self.backend.entry_kind(&file).await.or_raise(|| ErrorKind::Storage)? {
            EntryKind::File => {},
            EntryKind::Directory => {
                tracing::warn!(path = %file.display(), "Removing nested directory from morgue bucket");
                self.remove_best_effort(&file, EntryKind::Directory).await;
                return Ok(UsageInfo::default());
            },
            EntryKind::Missing => return Ok(UsageInfo::default()),
        }
        if name.ends_with(TMP_BODY_SUFFIX) {
            // Bodies that were never finalized; nobody can be writing them
            // while the origin is being initialized.
            if self.initializing {
                self.remove_best_effort(&file, EntryKind::File).await;
                return Ok(UsageInfo::default());
            }
        } else if !name.ends_with(FINAL_BODY_SUFFIX) {
            tracing::warn!(path = %file.display(), "Removing unexpected file from morgue bucket");
            self.remove_best_effort(&file, EntryKind::File).await;
            return Ok(UsageInfo::default());
        }
        let size = self.size_if_exists(&file).await?;
        // FIXME: Counting body sizes as database usage is a leftover from
        //        when the padding mutex had to be avoided on this path. Drop
        //        the option once nothing depends on the old split.
        Ok(if self.body_as_database { UsageInfo::from_database(size) } else { UsageInfo::from_file(size) })
    }

    async fn size_if_exists(&self, path: &Path) -> Result<u64> {
        match self.backend.size(path).await {
            Ok(size) => Ok(size),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
        }
    }

    async fn remove_best_effort(&self, path: &Path, kind: EntryKind) {
        let result = match kind {
            EntryKind::Directory => self.backend.remove_dir_all(path).await,
            _ => self.backend.remove_file(path).await,
        };
        if let Err(e) = result
            && !e.is_not_found()
        {
            tracing::warn!(path = %path.display(), error = ?e, "Could not remove entry; ignoring");
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
