//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Name of the record store inside an origin's cache directory.
pub const DATABASE_FILE_NAME: &str = "caches.sqlite";
/// Write-ahead log companion of [`DATABASE_FILE_NAME`].
pub const WAL_FILE_NAME: &str = "caches.sqlite-wal";

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Tunables for opening a record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// How long SQLite waits on a locked database before giving up.
    pub busy_timeout: Duration,
    /// Pool size. The usage engine only ever runs one query at a time.
    pub max_connections: u32,
}
impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(1500),
            max_connections: 1,
        }
    }
}

/// Database connection pool for one origin's record store.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to every pooled connection, not
            // only the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.max(1))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the record store at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(path: impl AsRef<Path>, options: &ConnectOptions) -> Result<Self> {
        let path = path.as_ref();
        let sqlite = Self::base_options(options).filename(path).create_if_missing(true);
        Self::new(sqlite, options.max_connections).await
    }

    /// Open a record store that must already exist.
    ///
    /// Fails with [`ErrorKind::NotFound`] when the file is missing, which is
    /// the normal state of an origin that never stored anything. The schema
    /// is brought up to date before returning.
    #[instrument(level = "debug", skip(path, options), fields(path = %path.as_ref().display()))]
    pub async fn open_existing(path: impl AsRef<Path>, options: &ConnectOptions) -> Result<Self> {
        let path = path.as_ref();
        let exists = tokio::fs::try_exists(path).await.or_raise(|| ErrorKind::Database)?;
        if !exists {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let sqlite = Self::base_options(options).filename(path).create_if_missing(false);
        Self::new(sqlite, options.max_connections).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Not behind `#[cfg(test)]` so that other crates can use it in their
    /// tests too.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = ConnectOptions::default();
        let sqlite = Self::base_options(&options).filename(":memory:");
        // Parallel connections to `:memory:` would each see their own
        // database, so stick to exactly one.
        Self::new(sqlite, 1).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options(options: &ConnectOptions) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // The WAL companion is counted as database usage by the engine.
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    ///
    /// Called automatically by every constructor.
    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to be returned to the pool and then closes
    /// them. The instance must not be used afterwards.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
