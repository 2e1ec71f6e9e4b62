//! Repository of metadata operations.
//!
//! Every multi-row mutation (directory consolidation, snapshot commits) runs
//! inside a single transaction; on error the transaction rolls back and the
//! database is exactly what it was before the call.
//!
//! Directory prefix queries (`search_directory_for_path`,
//! `find_directories_by_path_prefix`) load the directory table and compare
//! with [`Path::starts_with`] instead of SQL `LIKE`: component-wise
//! comparison can't be fooled by `/t` vs `/tt`, and a host tracks a handful
//! of roots at most.

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{
    Content, ContentRow, Directory, DirectoryRow, File, FileRow, FileSnapshot, SnapshotRow, nanos, path_str,
};
use bt_fs::FileStats;
use bt_vault::Digest;
use exn::{OptionExt, ResultExt};
use sqlx::{Sqlite, SqlitePool};
use std::path::Path;
use time::UtcDateTime;
use uuid::Uuid;

const SELECT_DIRECTORIES: &str = "SELECT id, path, created_at FROM directories";
const SELECT_FILE: &str = "SELECT id, directory_id, name, current_snapshot_id, deleted FROM files";
const SELECT_SNAPSHOT: &str = "SELECT id, file_id, content_id, created_at, size, permissions, uid, gid, \
                               accessed_at, modified_at, changed_at, born_at FROM file_snapshots";

/// Repository for directories, files, snapshots and contents.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /* =========== *\
    |  Directories  |
    \* =========== */

    /// Exact-path lookup of a tracked directory.
    pub async fn find_directory_by_path(&self, path: &Path) -> Result<Option<Directory>> {
        let row: Option<DirectoryRow> =
            sqlx::query_as(&format!("{SELECT_DIRECTORIES} WHERE path = ?1"))
                .bind(path_str(path)?)
                .fetch_optional(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(Directory::try_from).transpose()
    }

    /// The tracked directory that is `path` or an ancestor of it, if any.
    /// The antichain invariant guarantees at most one such directory.
    pub async fn search_directory_for_path(&self, path: &Path) -> Result<Option<Directory>> {
        Ok(self.all_directories().await?.into_iter().find(|dir| path.starts_with(&dir.path)))
    }

    /// Tracked directories strictly under `path`; these are the roots that a
    /// `create_directory(path)` call would consolidate away.
    pub async fn find_directories_by_path_prefix(&self, path: &Path) -> Result<Vec<Directory>> {
        Ok(self
            .all_directories()
            .await?
            .into_iter()
            .filter(|dir| dir.path != path && dir.path.starts_with(path))
            .collect())
    }

    async fn all_directories(&self) -> Result<Vec<Directory>> {
        let rows: Vec<DirectoryRow> =
            sqlx::query_as(SELECT_DIRECTORIES).fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Directory::try_from).collect()
    }

    /// Track a new directory root, consolidating subsumed children.
    ///
    /// In one transaction: insert the new `Directory`, reparent every file
    /// of every tracked directory strictly under `path` (prefixing the old
    /// root's relative suffix onto each file name), then delete those child
    /// directories. File identity — and with it snapshot history — is
    /// preserved across the move.
    ///
    /// Fails [`AlreadyTracked`](ErrorKind::AlreadyTracked) when `path` or an
    /// ancestor of it is already tracked; callers that want no-op semantics
    /// check [`search_directory_for_path`](Self::search_directory_for_path)
    /// first.
    pub async fn create_directory(&self, path: &Path) -> Result<Directory> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let rows: Vec<DirectoryRow> =
            sqlx::query_as(SELECT_DIRECTORIES).fetch_all(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        let existing = rows.into_iter().map(Directory::try_from).collect::<Result<Vec<_>>>()?;
        if existing.iter().any(|dir| path.starts_with(&dir.path)) {
            exn::bail!(ErrorKind::AlreadyTracked(path.to_path_buf()));
        }

        let directory = Directory {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            created_at: UtcDateTime::now(),
        };
        sqlx::query(include_str!("../queries/insert_directory.sql"))
            .bind(directory.id.to_string())
            .bind(path_str(path)?)
            .bind(nanos(directory.created_at)?)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;

        for child in existing.iter().filter(|dir| dir.path.starts_with(path)) {
            let suffix = child
                .path
                .strip_prefix(path)
                .ok()
                .and_then(|s| s.to_str())
                .ok_or_raise(|| ErrorKind::InvalidData("consolidation suffix"))?;
            tracing::info!(root = %path.display(), child = %child.path.display(), "consolidating tracked directory");
            sqlx::query(include_str!("../queries/reparent_files.sql"))
                .bind(directory.id.to_string())
                .bind(format!("{suffix}/"))
                .bind(child.id.to_string())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query("DELETE FROM directories WHERE id = ?1")
                .bind(child.id.to_string())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(directory)
    }

    /* ===== *\
    |  Files  |
    \* ===== */

    pub async fn find_file(&self, directory_id: Uuid, name: &str) -> Result<Option<File>> {
        let row: Option<FileRow> =
            sqlx::query_as(&format!("{SELECT_FILE} WHERE directory_id = ?1 AND name = ?2"))
                .bind(directory_id.to_string())
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        row.map(File::try_from).transpose()
    }

    /// Existing `File` at `(directory, name)`, or a fresh one with no
    /// current snapshot.
    pub async fn find_or_create_file(&self, directory_id: Uuid, name: &str) -> Result<File> {
        if let Some(file) = self.find_file(directory_id, name).await? {
            return Ok(file);
        }
        let file = File {
            id: Uuid::new_v4(),
            directory_id,
            name: name.to_string(),
            current_snapshot_id: None,
            deleted: false,
        };
        sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(file.id.to_string())
            .bind(file.directory_id.to_string())
            .bind(&file.name)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(file)
    }

    /// All files of a directory, deleted ones included, ordered by name.
    pub async fn list_files(&self, directory_id: Uuid) -> Result<Vec<File>> {
        let rows: Vec<FileRow> =
            sqlx::query_as(&format!("{SELECT_FILE} WHERE directory_id = ?1 ORDER BY name"))
                .bind(directory_id.to_string())
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(File::try_from).collect()
    }

    /// Persist the observation that a file's on-disk path vanished (or
    /// reappeared).
    pub async fn mark_file_deleted(&self, file_id: Uuid, deleted: bool) -> Result<()> {
        sqlx::query("UPDATE files SET deleted = ?1 WHERE id = ?2")
            .bind(deleted)
            .bind(file_id.to_string())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /* ==================== *\
    |  Snapshots & Contents  |
    \* ==================== */

    /// Idempotent insert of a content digest. The stored `created_at` is the
    /// first observation; later calls with the same digest change nothing.
    pub async fn get_or_create_content(&self, digest: &Digest, created_at: UtcDateTime) -> Result<Content> {
        sqlx::query(include_str!("../queries/upsert_content.sql"))
            .bind(digest.as_str())
            .bind(nanos(created_at)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let row: ContentRow = sqlx::query_as("SELECT id, created_at FROM contents WHERE id = ?1")
            .bind(digest.as_str())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Content::try_from(row)
    }

    /// Commit one backup operation's metadata in a single transaction:
    /// ensure the `Content` row exists, append the `FileSnapshot`, and move
    /// the file's current pointer onto it. A deleted file that shows up
    /// again is undeleted by the new snapshot.
    pub async fn append_snapshot(&self, file_id: Uuid, digest: &Digest, stats: &FileStats) -> Result<FileSnapshot> {
        let snapshot = FileSnapshot {
            id: Uuid::new_v4(),
            file_id,
            content_id: digest.clone(),
            created_at: UtcDateTime::now(),
            stats: *stats,
        };
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/upsert_content.sql"))
            .bind(digest.as_str())
            .bind(nanos(snapshot.created_at)?)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_snapshot.sql"))
            .bind(snapshot.id.to_string())
            .bind(file_id.to_string())
            .bind(digest.as_str())
            .bind(nanos(snapshot.created_at)?)
            .bind(i64::try_from(stats.size).or_raise(|| ErrorKind::InvalidData("size"))?)
            .bind(i64::from(stats.permissions))
            .bind(i64::from(stats.uid))
            .bind(i64::from(stats.gid))
            .bind(stats.accessed_at)
            .bind(stats.modified_at)
            .bind(stats.changed_at)
            .bind(stats.born_at)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query("UPDATE files SET current_snapshot_id = ?1, deleted = 0 WHERE id = ?2")
            .bind(snapshot.id.to_string())
            .bind(file_id.to_string())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(snapshot)
    }

    /// The snapshot the file's current pointer references, if any.
    pub async fn latest_snapshot(&self, file_id: Uuid) -> Result<Option<FileSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT s.id, s.file_id, s.content_id, s.created_at, s.size, s.permissions, s.uid, s.gid, \
             s.accessed_at, s.modified_at, s.changed_at, s.born_at \
             FROM file_snapshots s JOIN files f ON f.current_snapshot_id = s.id WHERE f.id = ?1",
        )
        .bind(file_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(FileSnapshot::try_from).transpose()
    }

    /// Full snapshot history of a file, newest first.
    pub async fn list_snapshots(&self, file_id: Uuid) -> Result<Vec<FileSnapshot>> {
        let rows: Vec<SnapshotRow> =
            sqlx::query_as(&format!("{SELECT_SNAPSHOT} WHERE file_id = ?1 ORDER BY created_at DESC, rowid DESC"))
                .bind(file_id.to_string())
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileSnapshot::try_from).collect()
    }

    /// Most recent snapshot of a file with the given digest; this is how a
    /// restore-by-version request names its target.
    pub async fn find_snapshot_by_digest(&self, file_id: Uuid, digest: &Digest) -> Result<Option<FileSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "{SELECT_SNAPSHOT} WHERE file_id = ?1 AND content_id = ?2 ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(file_id.to_string())
        .bind(digest.as_str())
        .fetch_optional(&self.pool)
        .await
        .or_raise(|| ErrorKind::Database)?;
        row.map(FileSnapshot::try_from).transpose()
    }

    /// Executor access for one-off queries in tests.
    #[doc(hidden)]
    pub fn pool(&self) -> &sqlx::Pool<Sqlite> {
        &self.pool
    }
}
