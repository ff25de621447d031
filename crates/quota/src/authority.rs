//! The quota authority: who owns origin directories and aggregate usage.

use crate::error::Result;
use crate::{ClientType, OriginMetadata, PersistenceType, UsageInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Bookkeeping of per-origin usage across every storage client.
///
/// The usage engine is one such client: it reports deltas when padding
/// disappears and falls back to the authority's cached numbers when it can't
/// compute usage itself.
#[async_trait]
pub trait QuotaAuthority: Send + Sync {
    /// Directory of an origin, relative to the storage root.
    fn directory_for_origin(&self, persistence: PersistenceType, origin: &OriginMetadata) -> Result<PathBuf>;

    /// Adjust the tracked usage of an origin by `delta` bytes.
    ///
    /// Usage is tracked per persistence bucket; the bucket is the one in
    /// `origin`.
    async fn report_usage_delta(&self, origin: &OriginMetadata, client: ClientType, delta: i64) -> Result<()>;

    /// Last known usage of a client within an origin's `persistence` bucket,
    /// if any was recorded. `origin.persistence()` is not consulted.
    async fn cached_usage(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        client: ClientType,
    ) -> Option<UsageInfo>;

    /// Whether the whole quota system is being torn down.
    fn is_shutting_down(&self) -> bool;
}

pub type AuthorityHandle = Arc<dyn QuotaAuthority>;

type UsageKey = (PersistenceType, String, ClientType);

/// In-process quota authority for a single storage root.
///
/// Maps origins to `<persistence>/<sanitized origin>` and keeps a usage table
/// in memory. Deltas are applied to the database bucket (padding is always
/// database usage) and saturate at zero.
#[derive(Default)]
pub struct LocalQuotaAuthority {
    usage: RwLock<HashMap<UsageKey, UsageInfo>>,
    shutting_down: AtomicBool,
}

impl LocalQuotaAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(persistence: PersistenceType, origin: &OriginMetadata, client: ClientType) -> UsageKey {
        (persistence, origin.origin().to_string(), client)
    }

    /// Replace the cached usage of a client, e.g. after initializing an origin.
    ///
    /// Stored under `origin.persistence()`.
    pub async fn record_usage(&self, origin: &OriginMetadata, client: ClientType, usage: UsageInfo) {
        let key = Self::key(origin.persistence(), origin, client);
        self.usage.write().await.insert(key, usage);
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}

#[async_trait]
impl QuotaAuthority for LocalQuotaAuthority {
    fn directory_for_origin(&self, persistence: PersistenceType, origin: &OriginMetadata) -> Result<PathBuf> {
        Ok(origin.with_persistence(persistence).relative_directory())
    }

    async fn report_usage_delta(&self, origin: &OriginMetadata, client: ClientType, delta: i64) -> Result<()> {
        let key = Self::key(origin.persistence(), origin, client);
        let mut usage = self.usage.write().await;
        let entry = usage.entry(key).or_default();
        let database = match u64::try_from(delta) {
            Ok(increase) => entry.database_usage().saturating_add(increase),
            Err(_) => entry.database_usage().saturating_sub(delta.unsigned_abs()),
        };
        *entry = UsageInfo::new(database, entry.file_usage());
        tracing::debug!(origin = origin.origin(), %client, delta, database, "Applied usage delta");
        Ok(())
    }

    async fn cached_usage(
        &self,
        persistence: PersistenceType,
        origin: &OriginMetadata,
        client: ClientType,
    ) -> Option<UsageInfo> {
        self.usage.read().await.get(&Self::key(persistence, origin, client)).copied()
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}
