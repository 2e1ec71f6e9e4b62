//! Database connection and pool management.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// One writer (the service) plus a couple of concurrent readers.
const MAX_CONNECTIONS: u32 = 4;

/// Connection pool for the metadata database.
///
/// The service process opens the database read-write and is its sole
/// writer; `status`/`log` invocations from other processes use
/// [`connect_read_only`](Self::connect_read_only) and never block a running
/// backup thanks to WAL mode.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>, migrate: bool) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Applies the query-based PRAGMAs to EVERY pooled connection,
            // not just the first one handed out.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        if migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Open (creating if missing) the metadata database at the given path
    /// and run migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, None, true).await
    }

    /// Open an existing database read-only. No migrations are run; a
    /// `status` reader must not mutate state owned by the service.
    ///
    /// Unlike [`connect`](Self::connect), no journal mode is imposed:
    /// switching journal modes is a write, and the file's own header already
    /// says how to read it (the live database is WAL; a `vacuum_into` copy
    /// is not).
    pub async fn connect_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .read_only(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_millis(1500));
        Self::new(options, None, false).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Not gated behind `#[cfg(test)]` so other crates can use it in
    ///   their tests too.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // A single connection, otherwise every pooled connection would see
        // its own empty private database.
        Self::new(options, Some(1), true).await
    }

    /// Base connection options shared by every open mode.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // WAL mode: concurrent readers during a backup cycle.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            // The schema has a reference cycle (files <-> file_snapshots);
            // enforcement catches reparenting mistakes early.
            .foreign_keys(true)
            // NORMAL is safe in WAL mode; the commit protocol forces a full
            // checkpoint at its durability point instead.
            .synchronous(SqliteSynchronous::Normal)
            // A backup cycle holds short write transactions; readers retry
            // briefly instead of failing with SQLITE_BUSY.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply PRAGMAs that aren't exposed via `SqliteConnectOptions`.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 400;
                PRAGMA cache_size = -4096;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Force a full WAL checkpoint, fsyncing committed transactions into the
    /// main database file. The commit protocol calls this before retiring a
    /// WAL entry so a subsequent crash cannot lose the snapshot row.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(FULL)")
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Write a consistent copy of the database to `target` (which must not
    /// exist yet). This is what gets uploaded to the vaults' metadata slots:
    /// `VACUUM INTO` takes a transactional snapshot, so the copy is valid
    /// even while the live database keeps changing.
    pub async fn vacuum_into(&self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref().to_string_lossy().into_owned();
        sqlx::query("VACUUM INTO ?1")
            .bind(target)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        // Let SQLite refresh query planner statistics on the way out.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
