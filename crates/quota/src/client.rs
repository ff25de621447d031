//! Quota client for the cache store.

use crate::error::{ErrorKind, Result};
use crate::padding::{self, PaddingFile, PaddingState, StagedPadding};
use crate::walk::Walk;
use crate::{
    AuthorityHandle, ClientType, ContentParentId, DirectoryLockId, OperationsHandle, OriginMetadata, PersistenceType,
    UsageInfo,
};
use async_trait::async_trait;
use cachemeter_records::{ConnectOptions, Repository};
use cachemeter_storage::BackendHandle;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::Mutex;
use tracing::instrument;

/// Lifecycle hooks a storage client exposes to the quota authority.
#[async_trait]
pub trait QuotaClient: Send + Sync {
    fn client_type(&self) -> ClientType;

    /// Compute an origin's usage during its first-time initialization.
    async fn init_origin(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
    ) -> Result<UsageInfo>;

    /// Called for client directories in places they shouldn't exist.
    async fn init_origin_without_tracking(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
    ) -> Result<()>;

    async fn get_usage_for_origin(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
    ) -> Result<UsageInfo>;

    /// Bring a client directory created before padding files existed up to date.
    async fn upgrade_storage_from_2_0_to_2_1(&self, dir: &Path) -> Result<()>;

    fn on_origin_clear_completed(&self, persistence: PersistenceType, origin: &str);
    fn abort_operations_for_locks(&self, locks: &[DirectoryLockId]);
    fn abort_operations_for_process(&self, process: ContentParentId);
    fn abort_all_operations(&self);
    fn start_idle_maintenance(&self);
    fn stop_idle_maintenance(&self);
    fn initiate_shutdown(&self);
    fn is_shutdown_completed(&self) -> bool;
    fn shutdown_status(&self) -> String;
    fn force_kill_actors(&self);
    fn finalize_shutdown(&self);
}

pub type ClientHandle = Arc<dyn QuotaClient>;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Used whenever an origin's record store has to be opened.
    pub records: ConnectOptions,
    /// Count body blobs as database usage (the legacy bucket split).
    pub body_usage_as_database_usage: bool,
}

/// Quota client of the cache store.
///
/// One instance serves every origin under a storage root. It is meant to be
/// created once by whatever owns the storage root, shared as a
/// [`ClientHandle`] (or `Arc<CacheQuotaClient>` where the padding helpers are
/// needed), and dropped after [`finalize_shutdown`](QuotaClient::finalize_shutdown).
///
/// All padding file access, across all origins, is serialised through one
/// mutex. It is held while padding state is inspected or changed (including
/// a recompute from the record store) but never across a directory walk.
pub struct CacheQuotaClient {
    backend: BackendHandle,
    authority: AuthorityHandle,
    operations: OperationsHandle,
    options: ClientOptions,
    padding_lock: Mutex<()>,
}

impl CacheQuotaClient {
    pub fn new(
        backend: BackendHandle,
        authority: AuthorityHandle,
        operations: OperationsHandle,
        options: ClientOptions,
    ) -> Self {
        Self { backend, authority, operations, options, padding_lock: Mutex::new(()) }
    }

    /// Cache directory of an origin, relative to the storage root.
    pub fn cache_directory(&self, persistence: PersistenceType, origin: &OriginMetadata) -> Result<PathBuf> {
        let origin_dir = self.authority.directory_for_origin(persistence, origin).or_raise(|| ErrorKind::Quota)?;
        Ok(origin_dir.join(ClientType::Cache.directory_name()))
    }

    /// Usage of an origin's cache directory.
    ///
    /// With `initializing` a missing or untrusted padding file is recomputed
    /// from the record store and written back. Without it the record store is
    /// left alone (it may be in use) and the authority's cached usage is
    /// returned instead, without walking the directory.
    #[instrument(skip_all, fields(origin = origin.origin(), %persistence, initializing = initializing))]
    pub async fn usage_for_origin(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
        initializing: bool,
    ) -> Result<UsageInfo> {
        let dir = self.cache_directory(persistence, origin)?;
        let padding = {
            let _guard = self.padding_lock.lock().await;
            self.locked_padding_for_usage(&dir, initializing).await?
        };
        let Some(padding) = padding else {
            // The authority's aggregate lives in the default bucket, whatever
            // bucket is being queried.
            let cached = self.authority.cached_usage(PersistenceType::Default, origin, ClientType::Cache).await;
            return Ok(cached.unwrap_or_else(|| {
                tracing::warn!(dir = %dir.display(), "Padding unknown and no cached usage, reporting zero");
                UsageInfo::default()
            }));
        };
        let walk = Walk {
            backend: self.backend.as_ref(),
            authority: self.authority.as_ref(),
            canceled,
            initializing,
            body_as_database: self.options.body_usage_as_database_usage,
        };
        let usage = walk.origin_usage(&dir).await?;
        // Padding is always database usage.
        Ok(UsageInfo::from_database(padding) + usage)
    }

    async fn locked_padding_for_usage(&self, dir: &Path, initializing: bool) -> Result<Option<u64>> {
        let backend = self.backend.as_ref();
        // A leftover temporary file means the last update never committed.
        if !padding::exists(backend, dir, PaddingFile::Temporary).await
            && let Ok(padding) = padding::get(backend, dir).await
        {
            return Ok(Some(padding));
        }
        if initializing {
            let padding = padding::padding_size_from_records(backend, dir, &self.options.records, true).await?;
            return Ok(Some(padding));
        }
        Ok(None)
    }

    /// Current state of an origin's padding files.
    pub async fn padding_state(&self, dir: &Path) -> Result<PaddingState> {
        let _guard = self.padding_lock.lock().await;
        PaddingState::inspect(self.backend.as_ref(), dir).await
    }

    /// Make the padding file reflect the record store after a commit.
    ///
    /// Recomputes and rewrites `.padding` if a temporary file was left behind
    /// or the committed file is missing or corrupt.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub async fn restore_padding_file(&self, dir: &Path, records: &Repository) -> Result<()> {
        let _guard = self.padding_lock.lock().await;
        padding::restore(self.backend.as_ref(), dir, records, true).await?;
        Ok(())
    }

    /// [`restore_padding_file`](Self::restore_padding_file) for callers that
    /// don't hold a record store connection.
    pub async fn restore_padding_file_from_records(&self, dir: &Path) -> Result<u64> {
        let _guard = self.padding_lock.lock().await;
        padding::padding_size_from_records(self.backend.as_ref(), dir, &self.options.records, true).await
    }

    /// Forget an origin's padding, e.g. when its cache is cleared.
    ///
    /// The committed total is given back to the quota authority, then both
    /// padding files are removed and a zero total is written. If the total
    /// can't be read there is nothing else to go by, so nothing is given back.
    #[instrument(skip_all, fields(origin = origin.origin(), dir = %dir.display()))]
    pub async fn wipe_padding_file(&self, origin: &OriginMetadata, dir: &Path) -> Result<()> {
        let _guard = self.padding_lock.lock().await;
        let backend = self.backend.as_ref();
        let padding = if padding::exists(backend, dir, PaddingFile::Temporary).await {
            None
        } else {
            padding::get(backend, dir).await.ok()
        };
        let padding = padding.unwrap_or_else(|| {
            tracing::warn!("Cannot read padding size from file");
            0
        });
        if padding > 0 {
            let delta = -i64::try_from(padding).unwrap_or(i64::MAX);
            self.authority
                .report_usage_delta(origin, ClientType::Cache, delta)
                .await
                .or_raise(|| ErrorKind::Quota)?;
        }
        padding::delete(backend, dir, PaddingFile::Final).await?;
        padding::delete(backend, dir, PaddingFile::Temporary).await?;
        padding::init(backend, dir).await
    }

    /// Apply a padding change around a record store commit.
    ///
    /// The new total is staged in `.padding-tmp`, `commit` runs, and the staged
    /// total is committed. If the committed total couldn't be trusted, the
    /// total is instead summed from `records` after `commit` and written as
    /// `.padding`. If `commit` fails the temporary file stays behind and the
    /// next access recomputes the total. When nothing changes and no temporary
    /// file is around, only `commit` runs.
    pub async fn maybe_update_padding_file<F, Fut, T>(
        &self,
        dir: &Path,
        records: &Repository,
        increase: u64,
        decrease: u64,
        commit: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let _guard = self.padding_lock.lock().await;
        let backend = self.backend.as_ref();
        let temporary_exists = padding::exists(backend, dir, PaddingFile::Temporary).await;
        if increase == decrease && !temporary_exists {
            return commit().await;
        }
        let staged = padding::update_temporary(backend, dir, increase, decrease, temporary_exists).await?;
        let committed = commit().await?;
        let finalized = match staged {
            StagedPadding::Total(_) => padding::finalize_write(backend, dir).await,
            // Only now do the records include this commit.
            StagedPadding::Unknown => padding::restore(backend, dir, records, true).await.map(|_| ()),
        };
        if let Err(e) = finalized {
            // The records are already committed. Dropping `.padding` makes the
            // next access recompute from them.
            tracing::warn!(dir = %dir.display(), error = ?e, "Could not commit padding file");
            _ = padding::delete(backend, dir, PaddingFile::Final).await;
        }
        Ok(committed)
    }
}

#[async_trait]
impl QuotaClient for CacheQuotaClient {
    fn client_type(&self) -> ClientType {
        ClientType::Cache
    }

    async fn init_origin(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
    ) -> Result<UsageInfo> {
        self.usage_for_origin(persistence, origin, canceled, true).await
    }

    async fn init_origin_without_tracking(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        _canceled: &AtomicBool,
    ) -> Result<()> {
        tracing::warn!(origin = origin.origin(), %persistence, "Unexpected cache directory found; ignoring");
        Ok(())
    }

    async fn get_usage_for_origin(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        canceled: &AtomicBool,
    ) -> Result<UsageInfo> {
        self.usage_for_origin(persistence, origin, canceled, false).await
    }

    async fn upgrade_storage_from_2_0_to_2_1(&self, dir: &Path) -> Result<()> {
        let _guard = self.padding_lock.lock().await;
        padding::init(self.backend.as_ref(), dir).await
    }

    fn on_origin_clear_completed(&self, _persistence: PersistenceType, _origin: &str) {}

    fn abort_operations_for_locks(&self, locks: &[DirectoryLockId]) {
        self.operations.abort(locks);
    }

    /// Deliberately does nothing.
    ///
    /// Cache contexts are shared by every process using an origin rather than
    /// owned by one, so a single process going away must not abort them.
    fn abort_operations_for_process(&self, _process: ContentParentId) {}

    fn abort_all_operations(&self) {
        self.operations.abort_all();
    }

    fn start_idle_maintenance(&self) {}

    fn stop_idle_maintenance(&self) {}

    fn initiate_shutdown(&self) {
        self.operations.initiate_shutdown();
    }

    fn is_shutdown_completed(&self) -> bool {
        self.operations.is_shutdown_complete()
    }

    fn shutdown_status(&self) -> String {
        self.operations.shutdown_status()
    }

    fn force_kill_actors(&self) {}

    fn finalize_shutdown(&self) {}
}
