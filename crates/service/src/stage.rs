//! Staging: reconcile files against the metadata store and queue changes.

use crate::error::{ErrorKind, Result};
use crate::service::BackupService;
use async_stream::stream;
use bt_fs::FileStats;
use bt_meta::Directory;
use bt_staging::{PreparedOp, QueuedOp};
use exn::{OptionExt, ResultExt};
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Checksum copies of independent files may overlap; staging is disk-bound,
/// so a handful of in-flight copies already saturates the device.
const MAX_STAGE_CONCURRENCY: usize = 8;

/// Why a discovered file was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// On-disk stats match the file's current snapshot; nothing to back up.
    UpToDate,
    /// An operation with the same stats is already queued.
    AlreadyStaged,
    /// The file changed while being copied into the staging area. The copy
    /// was discarded; staging it again once it settles will succeed.
    MutatedDuringStage,
}

/// Progress events emitted by [`BackupService::stage`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) — exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) — exactly once, with
///    the total file count.
/// 3. [`Staged`](Self::Staged) / [`Skipped`](Self::Skipped) — once per
///    discovered file, in filesystem-walk order.
/// 4. [`Complete`](Self::Complete) — exactly once, with the tallies.
///
/// Per-file failures surface as `Err` items without terminating the stream;
/// only discovery failures are fatal.
pub enum StageEvent {
    /// Staging has begun; emitted exactly once before any other event.
    Started,
    /// All candidate files are known; the total count is now fixed.
    DiscoveryComplete(u64),
    /// A file was copied into the staging area and queued.
    Staged(Box<QueuedOp>),
    /// A file was discovered but not queued.
    Skipped { path: PathBuf, reason: SkipReason },
    /// The stream is finished.
    Complete { staged: u64, skipped: u64, mutated: u64 },
}

enum Outcome {
    Prepared(Box<PreparedOp>),
    Skipped(PathBuf, SkipReason),
    Failed(crate::error::Error),
}

impl BackupService {
    /// Stage a file or directory tree for backup.
    ///
    /// The target is resolved against the tracked roots
    /// (fails [`NotTracked`](ErrorKind::NotTracked) if it lies outside all
    /// of them), expanded via the ignore-filtered walk when it is a
    /// directory, and reconciled file by file: unchanged files are skipped,
    /// everything else is copied into the staging area and queued.
    ///
    /// Copies of independent files overlap up to [`MAX_STAGE_CONCURRENCY`],
    /// but queue order — and therefore WAL sequence order — is strictly the
    /// walk order.
    pub fn stage<'a>(&'a self, path: &'a Path) -> impl Stream<Item = Result<StageEvent>> + 'a {
        stream!({
            yield Ok(StageEvent::Started);

            let (directory, files) = match self.discover(path).await {
                Ok(discovered) => discovered,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            yield Ok(StageEvent::DiscoveryComplete(files.len() as u64));

            // Queued ops are loaded once up front. The walk yields each path
            // at most once, so files staged by this very stream never need
            // re-checking.
            let queued_stats: Vec<(uuid::Uuid, FileStats)> = match self.staging.list() {
                Ok(ops) => ops.into_iter().map(|q| (q.op.file_id, q.op.stats)).collect(),
                Err(e) => {
                    yield Err(e).or_raise(|| ErrorKind::Staging);
                    return;
                },
            };

            let mut waiting: Vec<_> = files
                .iter()
                .enumerate()
                .map(|(index, file)| self.reconcile(&directory, &queued_stats, index, file))
                .collect();
            let mut processing = FuturesUnordered::new();
            processing.extend(waiting.drain(..MAX_STAGE_CONCURRENCY.min(waiting.len())));

            // Results can finish out of order; buffer them and emit (and
            // enqueue!) strictly in walk order.
            let mut ready = BTreeMap::new();
            let mut next_emit = 0usize;
            let (mut staged, mut skipped, mut mutated) = (0u64, 0u64, 0u64);
            while let Some((index, outcome)) = processing.next().await {
                ready.insert(index, outcome);
                if !waiting.is_empty() {
                    processing.push(waiting.remove(0));
                }
                while let Some(outcome) = ready.remove(&next_emit) {
                    next_emit += 1;
                    match outcome {
                        Outcome::Prepared(prepared) => match self.staging.enqueue(*prepared) {
                            Ok(queued) => {
                                staged += 1;
                                yield Ok(StageEvent::Staged(Box::new(queued)));
                            },
                            Err(e) => yield Err(e).or_raise(|| ErrorKind::Staging),
                        },
                        Outcome::Skipped(path, reason) => {
                            match reason {
                                SkipReason::MutatedDuringStage => mutated += 1,
                                _ => skipped += 1,
                            }
                            yield Ok(StageEvent::Skipped { path, reason });
                        },
                        Outcome::Failed(e) => yield Err(e),
                    }
                }
            }

            yield Ok(StageEvent::Complete { staged, skipped, mutated });
        })
    }

    /// Resolve the stage target and list candidate files in walk order.
    async fn discover(&self, path: &Path) -> Result<(Directory, Vec<PathBuf>)> {
        let resolved = bt_fs::resolve(path).or_raise(|| ErrorKind::Fs)?;
        let directory = self
            .repo
            .search_directory_for_path(&resolved)
            .await
            .or_raise(|| ErrorKind::Meta)?
            .ok_or_raise(|| ErrorKind::NotTracked(resolved.clone()))?;
        let rules = self.ignore_rules(&directory)?;
        let files = if resolved.is_dir() {
            bt_fs::walk(&resolved, &rules).collect::<std::result::Result<Vec<_>, _>>().or_raise(|| ErrorKind::Fs)?
        } else if rules.is_ignored(&resolved, false) {
            Vec::new()
        } else {
            vec![resolved]
        };
        Ok((directory, files))
    }

    /// Decide one file's fate: skip it, or copy it into a staging blob.
    /// Runs concurrently across files; nothing here touches the queue.
    async fn reconcile(
        &self,
        directory: &Directory,
        queued_stats: &[(uuid::Uuid, FileStats)],
        index: usize,
        path: &Path,
    ) -> (usize, Outcome) {
        (index, self.reconcile_inner(directory, queued_stats, path).await)
    }

    async fn reconcile_inner(
        &self,
        directory: &Directory,
        queued_stats: &[(uuid::Uuid, FileStats)],
        path: &Path,
    ) -> Outcome {
        let result: Result<Outcome> = async {
            let name = directory.relative_name(path).ok_or_raise(|| ErrorKind::UnknownFile(path.to_path_buf()))?;
            let file = self.repo.find_or_create_file(directory.id, &name).await.or_raise(|| ErrorKind::Meta)?;
            let stats = FileStats::read(path).or_raise(|| ErrorKind::Fs)?;

            if let Some(snapshot) = self.repo.latest_snapshot(file.id).await.or_raise(|| ErrorKind::Meta)?
                && stats.same_version(snapshot.stats.size, snapshot.stats.modified_at, snapshot.stats.changed_at)
            {
                return Ok(Outcome::Skipped(path.to_path_buf(), SkipReason::UpToDate));
            }
            if queued_stats
                .iter()
                .any(|(id, s)| *id == file.id && stats.same_version(s.size, s.modified_at, s.changed_at))
            {
                return Ok(Outcome::Skipped(path.to_path_buf(), SkipReason::AlreadyStaged));
            }

            match self.staging.prepare(directory.id, file.id, &name, path).await {
                Ok(prepared) => Ok(Outcome::Prepared(Box::new(prepared))),
                Err(e) if matches!(e.current_value(), bt_staging::error::ErrorKind::FileMutated(_)) => {
                    tracing::warn!(path = %path.display(), "file mutated during staging; skipped");
                    Ok(Outcome::Skipped(path.to_path_buf(), SkipReason::MutatedDuringStage))
                },
                Err(e) => Err(e).or_raise(|| ErrorKind::Staging),
            }
        }
        .await;
        result.unwrap_or_else(Outcome::Failed)
    }
}
