//! The commit loop: drain the WAL, then mirror the metadata database.

use crate::error::{ErrorKind, Result};
use crate::service::BackupService;
use bt_staging::QueuedOp;
use exn::ResultExt;
use tokio_util::sync::CancellationToken;

/// What a `backup` invocation accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupReport {
    /// Operations committed (vault upload + metadata row + WAL cleanup).
    pub committed: u64,
    /// Operations retired without re-committing because a previous run had
    /// already landed their side effects (crash recovery).
    pub recovered: u64,
    /// True when a cancellation request stopped the drain early; queued
    /// operations are preserved for the next run.
    pub cancelled: bool,
    /// True when the metadata database was mirrored to the vaults.
    pub metadata_uploaded: bool,
}

impl BackupService {
    /// Drain the staging queue in sequence order, then upload the metadata
    /// database to every vault if anything changed.
    ///
    /// The head operation is committed in the WAL's step order: upload the
    /// blob to every vault (uploads to distinct vaults overlap), append the
    /// snapshot in one database transaction, checkpoint, retire the WAL
    /// entry. A failing head stops the drain with its entry preserved —
    /// failures are typically transient network, and the next invocation
    /// retries from exactly where this one stopped.
    ///
    /// Cancellation is honored between operations: the in-flight operation
    /// finishes its current step (each step is idempotent or atomic, so
    /// this is no worse than a crash, which is also handled).
    pub async fn backup(&self, cancel: &CancellationToken) -> Result<BackupReport> {
        if self.vaults.is_empty() {
            exn::bail!(ErrorKind::NoVaults);
        }
        let mut report = BackupReport {
            committed: 0,
            recovered: 0,
            cancelled: false,
            metadata_uploaded: false,
        };
        loop {
            if cancel.is_cancelled() {
                tracing::info!("backup cancelled; queue preserved");
                report.cancelled = true;
                break;
            }
            let Some(queued) = self.staging.head().or_raise(|| ErrorKind::Staging)? else {
                break;
            };
            if self.commit(&queued).await? {
                report.committed += 1;
            } else {
                report.recovered += 1;
            }
        }
        if report.committed + report.recovered > 0 {
            self.upload_metadata().await?;
            report.metadata_uploaded = true;
        }
        Ok(report)
    }

    /// Commit one queued operation. Returns `false` when the recovery
    /// short-circuit found the operation already committed.
    async fn commit(&self, queued: &QueuedOp) -> Result<bool> {
        let op = &queued.op;

        // Recovery rule: a crash between the database commit and WAL cleanup
        // would otherwise duplicate the snapshot on replay (snapshots are
        // append-only, so the commit itself cannot be made idempotent). If
        // the file's current snapshot already carries this operation's
        // digest and stats, only the cleanup is still owed.
        if let Some(current) = self.repo.latest_snapshot(op.file_id).await.or_raise(|| ErrorKind::Meta)?
            && current.content_id == op.digest
            && current.stats == op.stats
        {
            tracing::info!(seq = queued.seq, name = %op.name, "operation already committed; retiring WAL entry");
            self.staging.complete(queued).or_raise(|| ErrorKind::Staging)?;
            return Ok(false);
        }

        tracing::debug!(seq = queued.seq, name = %op.name, digest = %op.digest, "committing operation");
        futures::future::try_join_all(self.vaults.iter().map(|vault| vault.put_content(&op.digest, queued.blob_path())))
            .await
            .or_raise(|| ErrorKind::Vault)?;

        self.repo.append_snapshot(op.file_id, &op.digest, &op.stats).await.or_raise(|| ErrorKind::Meta)?;
        self.db.checkpoint().await.or_raise(|| ErrorKind::Meta)?;

        self.staging.complete(queued).or_raise(|| ErrorKind::Staging)?;
        Ok(true)
    }

    /// Mirror the metadata database into every vault's per-host slot. Never
    /// uploads the live file: `VACUUM INTO` produces a consistent copy
    /// first.
    async fn upload_metadata(&self) -> Result<()> {
        let scratch = tempfile::tempdir().or_raise(|| ErrorKind::Fs)?;
        let copy = scratch.path().join("metadata.db");
        self.db.vacuum_into(&copy).await.or_raise(|| ErrorKind::Meta)?;
        futures::future::try_join_all(self.vaults.iter().map(|vault| vault.put_metadata(&self.host_id, &copy)))
            .await
            .or_raise(|| ErrorKind::Vault)?;
        tracing::info!(host_id = %self.host_id, vaults = self.vaults.len(), "metadata database mirrored");
        Ok(())
    }
}
