//! The service itself plus the small verbs: track, history, restore.

use crate::error::{ErrorKind, Result};
use bt_fs::IgnoreRules;
use bt_meta::{Database, Directory, File, FileSnapshot, Repository};
use bt_staging::StagingArea;
use bt_vault::{Digest, VaultHandle};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One service instance per host: sole writer of the metadata database and
/// the staging WAL, holder of the vault handles.
pub struct BackupService {
    pub(crate) db: Database,
    pub(crate) repo: Repository,
    pub(crate) staging: StagingArea,
    pub(crate) vaults: Vec<VaultHandle>,
    pub(crate) host_id: Uuid,
    pub(crate) ignore_list: Vec<String>,
}

impl BackupService {
    pub fn new(
        db: Database,
        staging: StagingArea,
        vaults: Vec<VaultHandle>,
        host_id: Uuid,
        ignore_list: Vec<String>,
    ) -> Self {
        let repo = Repository::from(&db);
        Self {
            db,
            repo,
            staging,
            vaults,
            host_id,
            ignore_list,
        }
    }

    /// Declare a directory eligible for backup.
    ///
    /// Tracking a path that is already inside a tracked root is a no-op
    /// success returning the existing root. Tracking an ancestor of
    /// previously tracked roots consolidates them: their files reparent onto
    /// the new root with their history intact.
    pub async fn track(&self, path: impl AsRef<Path>) -> Result<Directory> {
        let resolved = bt_fs::resolve_dir(path.as_ref()).or_raise(|| ErrorKind::Fs)?;
        if let Some(existing) = self.repo.search_directory_for_path(&resolved).await.or_raise(|| ErrorKind::Meta)? {
            tracing::info!(path = %resolved.display(), root = %existing.path.display(), "already tracked");
            return Ok(existing);
        }
        bt_fs::require_listable(&resolved).or_raise(|| ErrorKind::Fs)?;
        let directory = self.repo.create_directory(&resolved).await.or_raise(|| ErrorKind::Meta)?;
        tracing::info!(path = %resolved.display(), "tracking directory");
        Ok(directory)
    }

    /// Snapshot history of a file, newest first.
    pub async fn history(&self, path: impl AsRef<Path>) -> Result<Vec<FileSnapshot>> {
        let (_, file) = self.lookup_file(path.as_ref()).await?;
        self.repo.list_snapshots(file.id).await.or_raise(|| ErrorKind::Meta)
    }

    /// Restore a historical version of a file next to it.
    ///
    /// The snapshot named by `digest` is fetched from the first vault that
    /// can serve it and written to `<parent>/<file name>.<digest>`; the
    /// current file is left untouched. Recorded permissions, ownership and
    /// timestamps are applied afterwards — failures there (typically
    /// chown without privileges) demote to warnings because the bytes have
    /// already been restored faithfully.
    pub async fn restore(&self, path: impl AsRef<Path>, digest: &Digest) -> Result<PathBuf> {
        let path = path.as_ref();
        let (_, file) = self.lookup_file(path).await?;
        let snapshot = self
            .repo
            .find_snapshot_by_digest(file.id, digest)
            .await
            .or_raise(|| ErrorKind::Meta)?
            .ok_or_raise(|| ErrorKind::SnapshotNotFound(digest.to_string()))?;

        let resolved = resolve_entry(path)?;
        let file_name = resolved
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_raise(|| ErrorKind::UnknownFile(resolved.clone()))?;
        let target = resolved.with_file_name(format!("{file_name}.{digest}"));

        let mut fetched = false;
        for vault in &self.vaults {
            match vault.get_content(digest, &target).await {
                Ok(()) => {
                    fetched = true;
                    break;
                },
                Err(e) => {
                    tracing::warn!(vault = vault.name(), error = ?e, "vault could not serve content; trying next");
                },
            }
        }
        if !fetched {
            exn::bail!(ErrorKind::AllVaultsFailed(digest.to_string()));
        }

        apply_snapshot_metadata(&target, &snapshot);
        tracing::info!(target = %target.display(), %digest, "restored file version");
        Ok(target)
    }

    /// Resolve a path to its tracked directory and `File` row.
    pub(crate) async fn lookup_file(&self, path: &Path) -> Result<(Directory, File)> {
        let resolved = resolve_entry(path)?;
        let directory = self
            .repo
            .search_directory_for_path(&resolved)
            .await
            .or_raise(|| ErrorKind::Meta)?
            .ok_or_raise(|| ErrorKind::NotTracked(resolved.clone()))?;
        let name = directory.relative_name(&resolved).ok_or_raise(|| ErrorKind::UnknownFile(resolved.clone()))?;
        let file = self
            .repo
            .find_file(directory.id, &name)
            .await
            .or_raise(|| ErrorKind::Meta)?
            .ok_or_raise(|| ErrorKind::UnknownFile(resolved.clone()))?;
        Ok((directory, file))
    }

    pub(crate) fn ignore_rules(&self, directory: &Directory) -> Result<IgnoreRules> {
        IgnoreRules::compile(&directory.path, &self.ignore_list).or_raise(|| ErrorKind::Fs)
    }
}

/// Canonicalize a path that names a (possibly deleted) file: the parent must
/// exist, the final component need not. `history` and `restore` work on
/// files that are long gone from disk.
pub(crate) fn resolve_entry(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return bt_fs::resolve_file(path).or_raise(|| ErrorKind::Fs);
    }
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name().ok_or_raise(|| ErrorKind::UnknownFile(path.to_path_buf()))?;
    let parent = bt_fs::resolve_dir(parent).or_raise(|| ErrorKind::Fs)?;
    Ok(parent.join(file_name))
}

/// Best-effort application of recorded stat metadata to a restored file.
fn apply_snapshot_metadata(target: &Path, snapshot: &FileSnapshot) {
    use std::os::unix::fs::PermissionsExt;
    let stats = &snapshot.stats;
    if let Err(e) = std::fs::set_permissions(target, std::fs::Permissions::from_mode(stats.permissions)) {
        tracing::warn!(target = %target.display(), error = %e, "could not restore permissions");
    }
    if let Err(e) = std::os::unix::fs::chown(target, Some(stats.uid), Some(stats.gid)) {
        tracing::warn!(target = %target.display(), error = %e, "could not restore ownership");
    }
    let times = std::fs::FileTimes::new().set_accessed(stats.accessed()).set_modified(stats.modified());
    let result = std::fs::File::options().write(true).open(target).and_then(|f| f.set_times(times));
    if let Err(e) = result {
        tracing::warn!(target = %target.display(), error = %e, "could not restore timestamps");
    }
}
