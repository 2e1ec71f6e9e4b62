//! Command implementations.

use crate::config::BtConfig;
use crate::error::{ErrorKind, Result};
use bt_meta::Database;
use bt_service::{BackupService, SkipReason, StageEvent};
use bt_staging::StagingArea;
use bt_vault::Digest;
use exn::ResultExt;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// `bt config init` — write a fresh config with a generated host id.
/// Re-running against an existing config changes nothing.
pub fn config_init(path: &Path, home: &Path) -> Result<()> {
    if path.exists() {
        println!("config already exists at {}", path.display());
        return Ok(());
    }
    let config = BtConfig::generate(home);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
    }
    std::fs::write(path, config.to_toml()?).map_err(ErrorKind::Io)?;
    println!("wrote {} (host_id = {})", path.display(), config.host_id);
    Ok(())
}

/// `bt config list` — print the effective configuration.
pub fn config_list(config: &BtConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

/// `bt vault init` — run each backend's setup/permission probe.
pub async fn vault_init(config: &BtConfig) -> Result<()> {
    if config.vaults.is_empty() {
        println!("no vaults configured");
        return Ok(());
    }
    for vault_config in &config.vaults {
        let vault = bt_vault::connect(vault_config).await.or_raise(|| ErrorKind::Vault)?;
        vault.validate_setup().await.or_raise(|| ErrorKind::Vault)?;
        println!("vault {}: ok", vault.name());
    }
    Ok(())
}

/// Wire up the full service: database, staging WAL (taking the process
/// lock), and one handle per configured vault.
pub async fn open_service(config: &BtConfig) -> Result<BackupService> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(ErrorKind::Io)?;
    }
    let db = Database::connect(&db_path).await.or_raise(|| ErrorKind::Meta)?;
    let staging = StagingArea::open(config.staging_root()).or_raise(|| ErrorKind::Staging)?;
    let mut vaults = Vec::with_capacity(config.vaults.len());
    for vault_config in &config.vaults {
        vaults.push(bt_vault::connect(vault_config).await.or_raise(|| ErrorKind::Vault)?);
    }
    Ok(BackupService::new(db, staging, vaults, config.host_id, config.ignore_list.clone()))
}

/// `bt init` — track the current working directory.
pub async fn init(config: &BtConfig) -> Result<()> {
    let service = open_service(config).await?;
    let directory = service.track(cwd()?).await.or_raise(|| ErrorKind::Service)?;
    println!("tracking {}", directory.path.display());
    Ok(())
}

/// `bt add [PATH]` — stage a file or directory (default `.`).
pub async fn add(config: &BtConfig, path: Option<PathBuf>) -> Result<()> {
    let target = match path {
        Some(path) => path,
        None => cwd()?,
    };
    let service = open_service(config).await?;
    let mut stream = std::pin::pin!(service.stage(&target));
    let mut failed = 0u64;
    let mut tallies = None;
    while let Some(event) = stream.next().await {
        match event {
            Ok(StageEvent::Staged(queued)) => println!("staged     {}", queued.op.name),
            Ok(StageEvent::Skipped { path, reason }) => {
                let label = match reason {
                    SkipReason::UpToDate => "up to date",
                    SkipReason::AlreadyStaged => "queued",
                    SkipReason::MutatedDuringStage => "mutated",
                };
                println!("skipped    {} ({label})", path.display());
            },
            Ok(StageEvent::Complete { staged, skipped, mutated }) => tallies = Some((staged, skipped, mutated)),
            Ok(_) => {},
            Err(e) => {
                failed += 1;
                eprintln!("bt: {e:?}");
            },
        }
    }
    let (staged, skipped, mutated) = tallies.unwrap_or_default();
    println!("{staged} staged, {skipped} skipped");
    if mutated + failed > 0 {
        exn::bail!(ErrorKind::Partial(format!("{} file(s) could not be staged", mutated + failed)));
    }
    Ok(())
}

/// `bt backup` — drain the WAL, then mirror the metadata database.
/// SIGINT/SIGTERM stop the drain between operations; queued work survives.
pub async fn backup(config: &BtConfig) -> Result<()> {
    let service = open_service(config).await?;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing the in-flight operation");
            trigger.cancel();
        }
    });
    let report = service.backup(&cancel).await.or_raise(|| ErrorKind::Service)?;
    match report.cancelled {
        true => println!("backup interrupted: {} committed, queue preserved", report.committed),
        false => println!("backup complete: {} committed, {} recovered", report.committed, report.recovered),
    }
    Ok(())
}

/// `bt status [--deleted]` — per-file status of the current directory.
pub async fn status(config: &BtConfig, deleted: bool) -> Result<()> {
    let service = open_service(config).await?;
    let entries = service.status(cwd()?, deleted).await.or_raise(|| ErrorKind::Service)?;
    for entry in entries {
        println!("{:<12} {}", entry.status.to_string(), entry.name);
    }
    Ok(())
}

/// `bt log FILE` — snapshot history, newest first.
pub async fn log(config: &BtConfig, file: &Path) -> Result<()> {
    let service = open_service(config).await?;
    let history = service.history(file).await.or_raise(|| ErrorKind::Service)?;
    for snapshot in history {
        println!("{}  {:>10}  {}", snapshot.created_at, snapshot.stats.size, snapshot.content_id);
    }
    Ok(())
}

/// `bt restore FILE --digest=HEX` — restore a version to `FILE.HEX`.
pub async fn restore(config: &BtConfig, file: &Path, digest: &str) -> Result<()> {
    let digest = Digest::from_hex(digest).map_err(|_| ErrorKind::InvalidDigest(digest.to_string()))?;
    let service = open_service(config).await?;
    let target = service.restore(file, &digest).await.or_raise(|| ErrorKind::Service)?;
    println!("restored {}", target.display());
    Ok(())
}

fn cwd() -> Result<PathBuf> {
    Ok(std::env::current_dir().map_err(ErrorKind::Io)?)
}
