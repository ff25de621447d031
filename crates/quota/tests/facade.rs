use cachemeter_quota::error::ErrorKind;
use cachemeter_quota::padding::{self, PADDING_FILE_NAME, PaddingFile, PaddingState};
use cachemeter_quota::{
    AuthorityHandle, CacheQuotaClient, ClientOptions, ClientType, ContentParentId, IdleOperationManager,
    LocalQuotaAuthority, OriginMetadata, PersistenceType, QuotaAuthority, QuotaClient, UsageInfo,
};
use cachemeter_records::{ConnectOptions, DATABASE_FILE_NAME, Database, NewEntry, Repository, WAL_FILE_NAME};
use cachemeter_storage::backend::{LocalBackend, MockBackend};
use cachemeter_storage::BackendHandle;
use rstest::rstest;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

struct Fixture {
    temp_dir: TempDir,
    backend: BackendHandle,
    authority: Arc<LocalQuotaAuthority>,
    client: CacheQuotaClient,
    origin: OriginMetadata,
    dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend: BackendHandle = Arc::new(LocalBackend::new("local", temp_dir.path()).unwrap());
        Self::with_backend(temp_dir, backend)
    }

    fn with_backend(temp_dir: TempDir, backend: BackendHandle) -> Self {
        let authority = Arc::new(LocalQuotaAuthority::new());
        let client = CacheQuotaClient::new(
            backend.clone(),
            authority.clone() as AuthorityHandle,
            Arc::new(IdleOperationManager::new()),
            ClientOptions::default(),
        );
        let origin = OriginMetadata::new("https://example.com", PersistenceType::Default).unwrap();
        let dir = client.cache_directory(PersistenceType::Default, &origin).unwrap();
        Self { temp_dir, backend, authority, client, origin, dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn local(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(&self.dir).join(name)
    }

    async fn write(&self, name: &str, data: &[u8]) {
        self.backend.write(&self.path(name), data).await.unwrap();
    }

    async fn write_padding(&self, which: PaddingFile, padding: i64) {
        self.write(which.file_name(), &padding.to_be_bytes()).await;
    }

    async fn padding(&self) -> u64 {
        padding::get(self.backend.as_ref(), &self.dir).await.unwrap()
    }

    async fn has_temporary_padding(&self) -> bool {
        padding::exists(self.backend.as_ref(), &self.dir, PaddingFile::Temporary).await
    }

    /// A real record store holding one padded entry per value.
    async fn records(&self, paddings: &[u64]) -> Database {
        std::fs::create_dir_all(self.temp_dir.path().join(&self.dir)).unwrap();
        let db = Database::connect(self.local(DATABASE_FILE_NAME), &ConnectOptions::default()).await.unwrap();
        let repo = Repository::from(&db);
        for (i, padding) in paddings.iter().enumerate() {
            repo.insert_entry(&NewEntry::new(format!("https://example.com/{i}")).with_padding(*padding))
                .await
                .unwrap();
        }
        db
    }

    fn database_files_size(&self) -> u64 {
        [DATABASE_FILE_NAME, WAL_FILE_NAME]
            .iter()
            .filter_map(|name| std::fs::metadata(self.local(name)).ok())
            .map(|metadata| metadata.len())
            .sum()
    }
}

#[tokio::test]
async fn test_usage_is_additive() {
    let fixture = Fixture::new();
    fixture.write(DATABASE_FILE_NAME, &[0u8; 4096]).await;
    fixture.write_padding(PaddingFile::Final, 20480).await;
    fixture.write("morgue/0/{6a1b2c3d}.final", &[0u8; 1234]).await;

    let canceled = AtomicBool::new(false);
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::new(4096 + 20480, 1234));
}

#[tokio::test]
async fn test_fresh_origin_initializes_to_zero() {
    let fixture = Fixture::new();
    let canceled = AtomicBool::new(false);
    let usage = fixture.client.init_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert!(usage.is_zero());
    assert!(!fixture.local(DATABASE_FILE_NAME).exists());
}

#[tokio::test]
async fn test_init_recovers_from_interrupted_commit() {
    let fixture = Fixture::new();
    fixture.records(&[100, 200]).await.close().await;
    fixture.write_padding(PaddingFile::Final, 5).await;
    fixture.write_padding(PaddingFile::Temporary, 6).await;

    let canceled = AtomicBool::new(false);
    let usage = fixture.client.init_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::from_database(300 + fixture.database_files_size()));
    assert_eq!(fixture.padding().await, 300);
    assert!(!fixture.has_temporary_padding().await);
}

#[tokio::test]
async fn test_usage_query_falls_back_to_cached_usage() {
    let fixture = Fixture::new();
    fixture.write(DATABASE_FILE_NAME, &[0u8; 4096]).await;
    fixture.write_padding(PaddingFile::Temporary, 6).await;
    let canceled = AtomicBool::new(false);

    // Nothing cached yet.
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert!(usage.is_zero());

    fixture.authority.record_usage(&fixture.origin, ClientType::Cache, UsageInfo::new(777, 3)).await;
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::new(777, 3));
    // The record store was not touched, so the interrupted write is still there.
    assert!(fixture.has_temporary_padding().await);
}

#[tokio::test]
async fn test_usage_fallback_reads_default_bucket() {
    let fixture = Fixture::new();
    let origin = fixture.origin.with_persistence(PersistenceType::Persistent);
    let dir = fixture.client.cache_directory(PersistenceType::Persistent, &origin).unwrap();
    fixture.backend.write(&dir.join(PADDING_FILE_NAME), b"corrupt").await.unwrap();
    let canceled = AtomicBool::new(false);

    fixture.authority.record_usage(&origin, ClientType::Cache, UsageInfo::new(1, 1)).await;
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Persistent, &origin, &canceled).await.unwrap();
    assert!(usage.is_zero());

    fixture.authority.record_usage(&fixture.origin, ClientType::Cache, UsageInfo::new(512, 64)).await;
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Persistent, &origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::new(512, 64));
}

#[tokio::test]
async fn test_wipe_gives_padding_back() {
    let fixture = Fixture::new();
    fixture.authority.record_usage(&fixture.origin, ClientType::Cache, UsageInfo::new(50_000, 10)).await;
    fixture.write_padding(PaddingFile::Final, 20480).await;

    fixture.client.wipe_padding_file(&fixture.origin, &fixture.dir).await.unwrap();
    let cached = fixture.authority.cached_usage(PersistenceType::Default, &fixture.origin, ClientType::Cache).await;
    assert_eq!(cached, Some(UsageInfo::new(50_000 - 20480, 10)));
    assert_eq!(fixture.padding().await, 0);
    assert!(!fixture.has_temporary_padding().await);
}

#[tokio::test]
async fn test_wipe_with_unknown_padding_reports_nothing() {
    let fixture = Fixture::new();
    fixture.authority.record_usage(&fixture.origin, ClientType::Cache, UsageInfo::new(50_000, 10)).await;
    fixture.write_padding(PaddingFile::Final, 20480).await;
    fixture.write_padding(PaddingFile::Temporary, 40960).await;

    fixture.client.wipe_padding_file(&fixture.origin, &fixture.dir).await.unwrap();
    let cached = fixture.authority.cached_usage(PersistenceType::Default, &fixture.origin, ClientType::Cache).await;
    assert_eq!(cached, Some(UsageInfo::new(50_000, 10)));
    assert_eq!(fixture.padding().await, 0);
    assert!(!fixture.has_temporary_padding().await);
}

#[tokio::test]
async fn test_padding_update_commits_with_records() {
    let fixture = Fixture::new();
    let db = fixture.records(&[1000]).await;
    let repo = Repository::from(&db);
    fixture.write_padding(PaddingFile::Final, 1000).await;

    let id = fixture
        .client
        .maybe_update_padding_file(&fixture.dir, &repo, 500, 0, || async {
            repo.insert_entry(&NewEntry::new("https://example.com/new").with_padding(500))
                .await
                .or_raise(|| ErrorKind::Records)
        })
        .await
        .unwrap();
    assert!(id > 0);
    assert_eq!(fixture.padding().await, 1500);
    assert!(!fixture.has_temporary_padding().await);
    assert_eq!(repo.overall_padding_size().await.unwrap(), 1500);
    db.close().await;
}

#[rstest]
#[case::missing_final(None, false, 0)]
#[case::corrupt_final(Some(b"corrupt".as_slice()), false, 0)]
#[case::interrupted_write(Some(&[0, 0, 0, 0, 0, 0, 3, 232][..]), true, 0)]
#[case::out_of_range(Some(&[0, 0, 0, 0, 0, 0, 0, 100][..]), false, 5000)]
#[tokio::test]
async fn test_padding_update_recomputes_after_commit(
    #[case] committed: Option<&[u8]>,
    #[case] temporary: bool,
    #[case] decrease: u64,
) {
    let fixture = Fixture::new();
    let db = fixture.records(&[1000]).await;
    let repo = Repository::from(&db);
    if let Some(bytes) = committed {
        fixture.write(PADDING_FILE_NAME, bytes).await;
    }
    if temporary {
        fixture.write_padding(PaddingFile::Temporary, 1).await;
    }

    fixture
        .client
        .maybe_update_padding_file(&fixture.dir, &repo, 500, decrease, || async {
            repo.insert_entry(&NewEntry::new("https://example.com/new").with_padding(500))
                .await
                .or_raise(|| ErrorKind::Records)
        })
        .await
        .unwrap();
    assert_eq!(repo.overall_padding_size().await.unwrap(), 1500);
    assert_eq!(fixture.padding().await, 1500);
    assert!(!fixture.has_temporary_padding().await);
    db.close().await;
}

#[tokio::test]
async fn test_padding_update_without_changes_only_commits() {
    let fixture = Fixture::new();
    let db = fixture.records(&[]).await;
    let repo = Repository::from(&db);

    let committed = fixture.client.maybe_update_padding_file(&fixture.dir, &repo, 0, 0, || async { Ok(42) }).await;
    assert_eq!(committed.unwrap(), 42);
    assert!(matches!(fixture.client.padding_state(&fixture.dir).await.unwrap(), PaddingState::Absent));
    db.close().await;
}

#[tokio::test]
async fn test_failed_commit_is_recovered_on_next_restore() {
    let fixture = Fixture::new();
    let db = fixture.records(&[1000]).await;
    let repo = Repository::from(&db);
    fixture.write_padding(PaddingFile::Final, 1000).await;

    let result = fixture
        .client
        .maybe_update_padding_file(&fixture.dir, &repo, 0, 1000, || async {
            Err::<(), _>(exn::Exn::from(ErrorKind::Records))
        })
        .await;
    assert!(result.is_err());
    // The staged total was never committed.
    assert!(fixture.has_temporary_padding().await);
    assert_eq!(fixture.client.padding_state(&fixture.dir).await.unwrap(), PaddingState::TemporaryPresent);

    fixture.client.restore_padding_file(&fixture.dir, &repo).await.unwrap();
    assert_eq!(fixture.padding().await, 1000);
    assert!(!fixture.has_temporary_padding().await);
    db.close().await;
}

#[tokio::test]
async fn test_restore_without_a_connection() {
    let fixture = Fixture::new();
    fixture.records(&[20480, 20480]).await.close().await;
    fixture.write_padding(PaddingFile::Temporary, 1).await;

    let padding = fixture.client.restore_padding_file_from_records(&fixture.dir).await.unwrap();
    assert_eq!(padding, 40960);
    assert_eq!(fixture.padding().await, 40960);
    assert!(!fixture.has_temporary_padding().await);
}

#[tokio::test]
async fn test_cancellation_aborts_usage() {
    let fixture = Fixture::new();
    fixture.write(DATABASE_FILE_NAME, &[0u8; 4096]).await;
    fixture.write_padding(PaddingFile::Final, 0).await;

    let canceled = AtomicBool::new(true);
    let err = fixture.client.init_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Aborted));
    assert!(err.is_abort());
}

#[tokio::test]
async fn test_shutdown_aborts_usage() {
    let fixture = Fixture::new();
    fixture.write(DATABASE_FILE_NAME, &[0u8; 4096]).await;
    fixture.write_padding(PaddingFile::Final, 0).await;
    fixture.authority.begin_shutdown();

    let canceled = AtomicBool::new(false);
    let err = fixture.client.init_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::ShuttingDown));
}

#[tokio::test]
async fn test_vanishing_body_is_harmless() {
    let dir = Path::new("default/https+++example.com/cache");
    let backend = MockBackend::with_files([
        (dir.join(DATABASE_FILE_NAME), vec![0u8; 100]),
        (dir.join(PADDING_FILE_NAME), 20480i64.to_be_bytes().to_vec()),
        (dir.join("morgue/3/{a}.final"), vec![0u8; 10]),
    ])
    .with_vanishing(dir.join("morgue/3/{b}.final"));
    let fixture = Fixture::with_backend(tempfile::tempdir().unwrap(), Arc::new(backend));
    assert_eq!(fixture.dir, dir);

    let canceled = AtomicBool::new(false);
    let usage = fixture.client.get_usage_for_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::new(100 + 20480, 10));
}

#[tokio::test]
async fn test_stray_file_is_harmless() {
    let fixture = Fixture::new();
    fixture.write(DATABASE_FILE_NAME, &[0u8; 100]).await;
    fixture.write("randomfile.tmp", &[0u8; 5000]).await;
    fixture.write_padding(PaddingFile::Final, 0).await;
    fixture.write("context_open.marker", &[]).await;

    let canceled = AtomicBool::new(false);
    let usage = fixture.client.init_origin(PersistenceType::Default, &fixture.origin, &canceled).await.unwrap();
    assert_eq!(usage, UsageInfo::from_database(100));
    assert!(fixture.local("randomfile.tmp").exists());
}

#[tokio::test]
async fn test_get_is_idempotent() {
    let fixture = Fixture::new();
    fixture.write_padding(PaddingFile::Final, 123).await;
    assert_eq!(fixture.padding().await, 123);
    assert_eq!(fixture.padding().await, 123);
}

#[tokio::test]
async fn test_upgrade_initializes_padding() {
    let fixture = Fixture::new();
    fixture.client.upgrade_storage_from_2_0_to_2_1(&fixture.dir).await.unwrap();
    assert_eq!(fixture.padding().await, 0);

    fixture.write_padding(PaddingFile::Final, 99).await;
    fixture.client.upgrade_storage_from_2_0_to_2_1(&fixture.dir).await.unwrap();
    assert_eq!(fixture.padding().await, 99);
}

#[tokio::test]
async fn test_lifecycle_hooks() {
    let fixture = Fixture::new();
    let client: &dyn QuotaClient = &fixture.client;
    let canceled = AtomicBool::new(false);
    assert_eq!(client.client_type(), ClientType::Cache);
    client.init_origin_without_tracking(PersistenceType::Persistent, &fixture.origin, &canceled).await.unwrap();
    client.abort_operations_for_locks(&[1, 2, 3]);
    client.abort_operations_for_process(ContentParentId(7));
    client.abort_all_operations();
    client.start_idle_maintenance();
    client.stop_idle_maintenance();
    client.on_origin_clear_completed(PersistenceType::Default, fixture.origin.origin());
    client.initiate_shutdown();
    assert!(client.is_shutdown_completed());
    assert_eq!(client.shutdown_status(), "shutdown initiated, no cache contexts open");
    client.force_kill_actors();
    client.finalize_shutdown();
}
