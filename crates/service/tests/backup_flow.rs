//! End-to-end backup flows against an in-memory vault.

use bt_meta::{Database, Repository};
use bt_service::{BackupService, FileStatus, SkipReason, StageEvent};
use bt_staging::StagingArea;
use bt_vault::backend::MockVault;
use bt_vault::{Digest, Vault, VaultHandle};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// SHA-256 of "hi\n".
const HI_DIGEST: &str = "98ea6e4f216f2fb4b69fff9b3a44842c38686ca685f3f55dc48c5d3fb1107be4";

struct Harness {
    base: tempfile::TempDir,
    tree: PathBuf,
    db: Database,
    vault: Arc<MockVault>,
    host_id: Uuid,
    service: BackupService,
}

impl Harness {
    async fn new() -> Self {
        Self::with_ignore_list(vec![]).await
    }

    async fn with_ignore_list(ignore_list: Vec<String>) -> Self {
        let base = tempfile::tempdir().unwrap();
        let tree = base.path().join("tree");
        std::fs::create_dir(&tree).unwrap();
        let db = Database::connect(base.path().join("metadata.db")).await.unwrap();
        let staging = StagingArea::open(base.path().join("wal")).unwrap();
        let vault = Arc::new(MockVault::new("primary"));
        let host_id = Uuid::new_v4();
        let service =
            BackupService::new(db.clone(), staging, vec![vault.clone() as VaultHandle], host_id, ignore_list);
        Self {
            base,
            tree,
            db,
            vault,
            host_id,
            service,
        }
    }

    fn repo(&self) -> Repository {
        Repository::from(&self.db)
    }

    fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.tree.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// Drive the stage stream to completion, returning (staged, skipped, mutated).
    async fn stage(&self, path: &Path) -> (u64, u64, u64) {
        let mut stream = std::pin::pin!(self.service.stage(path));
        let mut tallies = (0, 0, 0);
        while let Some(event) = stream.next().await {
            if let StageEvent::Complete { staged, skipped, mutated } = event.unwrap() {
                tallies = (staged, skipped, mutated);
            }
        }
        tallies
    }

    async fn backup(&self) -> bt_service::BackupReport {
        self.service.backup(&CancellationToken::new()).await.unwrap()
    }

    fn queue_len(&self) -> usize {
        std::fs::read_dir(self.base.path().join("wal/queue")).unwrap().count()
    }

    fn blob_count(&self) -> usize {
        std::fs::read_dir(self.base.path().join("wal/staging")).unwrap().count()
    }
}

#[tokio::test]
async fn test_hello_world_backup() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("a.txt", b"hi\n");

    let (staged, skipped, mutated) = h.stage(&h.tree).await;
    assert_eq!((staged, skipped, mutated), (1, 0, 0));

    let report = h.backup().await;
    assert_eq!(report.committed, 1);
    assert!(report.metadata_uploaded);

    // The vault holds exactly the content object plus the metadata slot.
    assert_eq!(
        h.vault.keys().await,
        [format!("content/{HI_DIGEST}"), format!("metadata/{}", h.host_id)]
    );
    assert_eq!(h.vault.object(&format!("content/{HI_DIGEST}")).await.unwrap(), b"hi\n");

    // One snapshot with the right digest and size.
    let history = h.service.history(&file).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content_id.as_str(), HI_DIGEST);
    assert_eq!(history[0].stats.size, 3);
}

#[tokio::test]
async fn test_dedup_across_files() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"x");
    h.write("b.txt", b"x");

    assert_eq!(h.stage(&h.tree).await.0, 2);
    assert_eq!(h.backup().await.committed, 2);

    // Two files, two snapshots, ONE content row, ONE actual upload.
    let repo = h.repo();
    let (contents,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contents").fetch_one(repo.pool()).await.unwrap();
    let (snapshots,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM file_snapshots").fetch_one(repo.pool()).await.unwrap();
    assert_eq!((contents, snapshots), (1, 2));
    assert_eq!(h.vault.uploads(), 1);
}

#[tokio::test]
async fn test_wal_drains_clean() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"one");
    h.write("b/c.txt", b"two");

    h.stage(&h.tree).await;
    assert_eq!(h.queue_len(), 2);
    assert_eq!(h.blob_count(), 2);

    h.backup().await;
    assert_eq!(h.queue_len(), 0);
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_wal_order_is_walk_order() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    // Written shuffled; the walk (and therefore the queue) is lexicographic.
    for name in ["delta", "alpha", "echo", "charlie", "bravo"] {
        h.write(name, name.as_bytes());
    }
    h.stage(&h.tree).await;

    let mut records: Vec<(String, String)> = std::fs::read_dir(h.base.path().join("wal/queue"))
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let seq = path.file_name().unwrap().to_str().unwrap().split('-').next().unwrap().to_string();
            let op = bt_staging::Operation::decode(&std::fs::read(&path).unwrap(), &path).unwrap();
            (seq, op.name)
        })
        .collect();
    records.sort();
    let names: Vec<&str> = records.iter().map(|(_, name)| name.as_str()).collect();
    assert_eq!(names, ["alpha", "bravo", "charlie", "delta", "echo"], "queue sequence must follow walk order");
}

#[tokio::test]
async fn test_stage_skips_unchanged_files() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"stable");

    assert_eq!(h.stage(&h.tree).await, (1, 0, 0));
    h.backup().await;

    // Unchanged since the snapshot: nothing to do.
    assert_eq!(h.stage(&h.tree).await, (0, 1, 0));
    assert_eq!(h.queue_len(), 0);
}

#[tokio::test]
async fn test_stage_twice_without_backup_is_idempotent() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("a.txt", b"payload");

    assert_eq!(h.stage(&h.tree).await, (1, 0, 0));
    // Second stage sees the queued op with identical stats and skips.
    let mut saw_already_staged = false;
    let mut stream = std::pin::pin!(h.service.stage(&h.tree));
    while let Some(event) = stream.next().await {
        if let StageEvent::Skipped { reason: SkipReason::AlreadyStaged, .. } = event.unwrap() {
            saw_already_staged = true;
        }
    }
    drop(stream);
    assert!(saw_already_staged);
    assert_eq!(h.queue_len(), 1);

    h.backup().await;
    assert_eq!(h.service.history(&file).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_crash_after_upload_before_commit() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("a.txt", b"hi\n");
    h.stage(&h.tree).await;

    // Simulate a crash after step 1 (vault upload) of the commit protocol:
    // the object landed, the database and queue never heard about it.
    let digest: Digest = HI_DIGEST.parse().unwrap();
    let blob = h.base.path().join("wal/staging");
    let blob = std::fs::read_dir(blob).unwrap().next().unwrap().unwrap().path();
    h.vault.put_content(&digest, &blob).await.unwrap();
    assert_eq!(h.vault.uploads(), 1);

    // Re-running backup converges: the put is a no-op, the commit proceeds.
    let report = h.backup().await;
    assert_eq!(report.committed, 1);
    assert_eq!(h.vault.uploads(), 1, "idempotent upload must not transfer again");
    assert_eq!(h.service.history(&file).await.unwrap().len(), 1);
    assert_eq!(h.queue_len(), 0);
}

#[tokio::test]
async fn test_crash_after_commit_before_cleanup() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("a.txt", b"hi\n");
    h.stage(&h.tree).await;

    // Simulate a crash after step 3: upload done, snapshot committed, WAL
    // entry still present.
    let repo = h.repo();
    let digest: Digest = HI_DIGEST.parse().unwrap();
    let blob = std::fs::read_dir(h.base.path().join("wal/staging")).unwrap().next().unwrap().unwrap().path();
    h.vault.put_content(&digest, &blob).await.unwrap();
    let record = std::fs::read_dir(h.base.path().join("wal/queue")).unwrap().next().unwrap().unwrap().path();
    let op = bt_staging::Operation::decode(&std::fs::read(&record).unwrap(), &record).unwrap();
    repo.append_snapshot(op.file_id, &op.digest, &op.stats).await.unwrap();

    // Replay must NOT append a second snapshot; it only retires the entry.
    let report = h.backup().await;
    assert_eq!((report.committed, report.recovered), (0, 1));
    assert_eq!(h.service.history(&file).await.unwrap().len(), 1);
    assert_eq!(h.queue_len(), 0);
}

#[tokio::test]
async fn test_backup_stops_at_failed_head() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"one");
    h.write("b.txt", b"two");
    h.stage(&h.tree).await;

    h.vault.set_fail_puts(true);
    let err = h.service.backup(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err.current_value(), bt_service::error::ErrorKind::Vault));
    // Failed head blocks later ops; everything is preserved for retry.
    assert_eq!(h.queue_len(), 2);
    assert!(h.vault.object(&format!("metadata/{}", h.host_id)).await.is_none());

    h.vault.set_fail_puts(false);
    let report = h.backup().await;
    assert_eq!(report.committed, 2);
    assert_eq!(h.queue_len(), 0);
    assert!(h.vault.object(&format!("metadata/{}", h.host_id)).await.is_some());
}

#[tokio::test]
async fn test_cancelled_backup_preserves_queue() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"pending");
    h.stage(&h.tree).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.service.backup(&cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.committed, 0);
    assert_eq!(h.queue_len(), 1);
}

#[tokio::test]
async fn test_consolidation_preserves_history_end_to_end() {
    let h = Harness::new().await;
    let sub = h.tree.join("sub");
    std::fs::create_dir(&sub).unwrap();
    let file = h.write("sub/x", b"contents of x");

    h.service.track(&sub).await.unwrap();
    h.stage(&sub).await;
    h.backup().await;

    // Track the parent: /tree absorbs /tree/sub.
    h.service.track(&h.tree).await.unwrap();
    let repo = h.repo();
    let canonical_tree = h.tree.canonicalize().unwrap();
    assert!(repo.find_directory_by_path(&canonical_tree).await.unwrap().is_some());
    assert!(repo.find_directory_by_path(&sub.canonicalize().unwrap()).await.unwrap().is_none());

    // Same file, new name, history intact.
    let history = h.service.history(&file).await.unwrap();
    assert_eq!(history.len(), 1);
    let statuses = h.service.status(&h.tree, false).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].name, "sub/x");
    assert_eq!(statuses[0].status, FileStatus::BackedUp);
}

#[tokio::test]
async fn test_restore_old_version() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("f", b"v1");
    h.stage(&h.tree).await;
    h.backup().await;

    std::fs::write(&file, b"v2, now with more bytes").unwrap();
    h.stage(&h.tree).await;
    h.backup().await;
    assert_eq!(h.service.history(&file).await.unwrap().len(), 2);

    let v1_digest = Digest::of_bytes(b"v1");
    let restored = h.service.restore(&file, &v1_digest).await.unwrap();
    assert_eq!(restored.file_name().unwrap().to_str().unwrap(), format!("f.{v1_digest}"));
    assert_eq!(std::fs::read(&restored).unwrap(), b"v1");
    // The current file is untouched.
    assert_eq!(std::fs::read(&file).unwrap(), b"v2, now with more bytes");

    // Restored metadata matches the recorded snapshot.
    use std::os::unix::fs::PermissionsExt;
    let snapshot = h.service.history(&file).await.unwrap().into_iter().find(|s| s.content_id == v1_digest).unwrap();
    let mode = std::fs::metadata(&restored).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, snapshot.stats.permissions);
}

#[tokio::test]
async fn test_restore_unknown_digest() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    let file = h.write("f", b"only version");
    h.stage(&h.tree).await;
    h.backup().await;

    let err = h.service.restore(&file, &Digest::of_bytes(b"never seen")).await.unwrap_err();
    assert!(matches!(err.current_value(), bt_service::error::ErrorKind::SnapshotNotFound(_)));
}

#[tokio::test]
async fn test_stage_outside_tracked_root() {
    let h = Harness::new().await;
    let stray = h.base.path().join("stray.txt");
    std::fs::write(&stray, b"x").unwrap();

    let mut stream = std::pin::pin!(h.service.stage(&stray));
    let mut failed = false;
    while let Some(event) = stream.next().await {
        if let Err(e) = event {
            assert!(matches!(e.current_value(), bt_service::error::ErrorKind::NotTracked(_)));
            failed = true;
        }
    }
    assert!(failed);
}

#[tokio::test]
async fn test_status_classification() {
    let h = Harness::with_ignore_list(vec!["*.log".to_string()]).await;
    h.service.track(&h.tree).await.unwrap();

    let _backed_up = h.write("backed_up.txt", b"steady");
    let modified = h.write("modified.txt", b"before");
    let deleted = h.write("deleted.txt", b"doomed");
    h.stage(&h.tree).await;
    h.backup().await;

    std::fs::write(&modified, b"after: changed on disk").unwrap();
    std::fs::remove_file(&deleted).unwrap();
    h.write("staged.txt", b"queued");
    h.stage(&h.tree.join("staged.txt")).await;
    h.write("untracked.txt", b"new");
    h.write("noise.log", b"ignored");

    let entries = h.service.status(&h.tree, true).await.unwrap();
    let get = |name: &str| entries.iter().find(|e| e.name == name).map(|e| e.status);
    assert_eq!(get("backed_up.txt"), Some(FileStatus::BackedUp));
    assert_eq!(get("modified.txt"), Some(FileStatus::Modified));
    assert_eq!(get("staged.txt"), Some(FileStatus::Staged));
    assert_eq!(get("untracked.txt"), Some(FileStatus::Untracked));
    assert_eq!(get("noise.log"), Some(FileStatus::Ignored));
    assert_eq!(get("deleted.txt"), Some(FileStatus::Deleted));

    // Without the flag, deleted entries stay out of the listing.
    let entries = h.service.status(&h.tree, false).await.unwrap();
    assert!(entries.iter().all(|e| e.status != FileStatus::Deleted));
}

#[tokio::test]
async fn test_metadata_mirror_is_a_valid_database() {
    let h = Harness::new().await;
    h.service.track(&h.tree).await.unwrap();
    h.write("a.txt", b"hi\n");
    h.stage(&h.tree).await;
    h.backup().await;

    // Download the mirrored metadata and open it: it must be a consistent
    // database containing the committed snapshot.
    let fetched = h.base.path().join("fetched.db");
    h.vault.get_metadata(&h.host_id, &fetched).await.unwrap();
    let mirror = Database::connect_read_only(&fetched).await.unwrap();
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM file_snapshots").fetch_one(mirror.pool()).await.unwrap();
    assert_eq!(count, 1);
}
