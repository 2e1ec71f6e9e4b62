//! Per-file status classification.

use crate::error::{ErrorKind, Result};
use crate::service::BackupService;
use bt_fs::FileStats;
use exn::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Classification of a single path, in precedence order: the first matching
/// condition from the top wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Matches the ignore rules; bt will not touch it.
    Ignored,
    /// Known to bt, but the on-disk stats differ from the current snapshot.
    Modified,
    /// An operation for this file is waiting in the staging queue.
    Staged,
    /// On disk but never successfully backed up.
    Untracked,
    /// Current snapshot matches the on-disk state.
    BackedUp,
    /// Known to bt, but the on-disk path has vanished. Only reported when
    /// deleted entries are requested.
    Deleted,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ignored => "ignored",
            Self::Modified => "modified",
            Self::Staged => "staged",
            Self::Untracked => "untracked",
            Self::BackedUp => "backed up",
            Self::Deleted => "deleted",
        };
        f.write_str(label)
    }
}

/// One line of `bt status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Path relative to the tracked root.
    pub name: String,
    pub status: FileStatus,
}

impl BackupService {
    /// Classify every file under `path` (which must lie inside a tracked
    /// root). Deleted bookkeeping always happens — vanished files get their
    /// `deleted` flag persisted — but the entries only appear in the output
    /// when `include_deleted` is set.
    pub async fn status(&self, path: impl AsRef<Path>, include_deleted: bool) -> Result<Vec<StatusEntry>> {
        let resolved = bt_fs::resolve_dir(path.as_ref()).or_raise(|| ErrorKind::Fs)?;
        let directory = self
            .repo
            .search_directory_for_path(&resolved)
            .await
            .or_raise(|| ErrorKind::Meta)?
            .ok_or_raise(|| ErrorKind::NotTracked(resolved.clone()))?;
        let rules = self.ignore_rules(&directory)?;
        let staged: HashSet<uuid::Uuid> =
            self.staging.list().or_raise(|| ErrorKind::Staging)?.into_iter().map(|q| q.op.file_id).collect();

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for path in bt_fs::walk_unfiltered(&resolved) {
            let path = path.or_raise(|| ErrorKind::Fs)?;
            let Some(name) = directory.relative_name(&path) else {
                continue;
            };
            seen.insert(name.clone());
            let status = self.classify(&directory, &rules, &staged, &path, &name).await?;
            entries.push(StatusEntry { name, status });
        }

        // Every known file whose on-disk path is absent is DELETED; persist
        // the observation (the service is the single writer, so this is the
        // one place the flag may be set).
        let scope = directory.relative_name(&resolved);
        for file in self.repo.list_files(directory.id).await.or_raise(|| ErrorKind::Meta)? {
            if seen.contains(&file.name) {
                if file.deleted {
                    // Back from the dead, as far as the disk is concerned.
                    self.repo.mark_file_deleted(file.id, false).await.or_raise(|| ErrorKind::Meta)?;
                }
                continue;
            }
            if let Some(scope) = &scope
                && !file.name.starts_with(&format!("{scope}/"))
            {
                continue;
            }
            if !file.deleted {
                self.repo.mark_file_deleted(file.id, true).await.or_raise(|| ErrorKind::Meta)?;
            }
            if include_deleted {
                entries.push(StatusEntry {
                    name: file.name,
                    status: FileStatus::Deleted,
                });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn classify(
        &self,
        directory: &bt_meta::Directory,
        rules: &bt_fs::IgnoreRules,
        staged: &HashSet<uuid::Uuid>,
        path: &Path,
        name: &str,
    ) -> Result<FileStatus> {
        if rules.is_ignored(path, false) {
            return Ok(FileStatus::Ignored);
        }
        let file = self.repo.find_file(directory.id, name).await.or_raise(|| ErrorKind::Meta)?;
        let Some(file) = file else {
            return Ok(FileStatus::Untracked);
        };
        let snapshot = self.repo.latest_snapshot(file.id).await.or_raise(|| ErrorKind::Meta)?;
        if let Some(snapshot) = &snapshot {
            let stats = FileStats::read(path).or_raise(|| ErrorKind::Fs)?;
            if !stats.same_version(snapshot.stats.size, snapshot.stats.modified_at, snapshot.stats.changed_at) {
                return Ok(FileStatus::Modified);
            }
        }
        if staged.contains(&file.id) {
            return Ok(FileStatus::Staged);
        }
        if snapshot.is_none() {
            return Ok(FileStatus::Untracked);
        }
        Ok(FileStatus::BackedUp)
    }
}
