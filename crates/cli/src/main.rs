//! `bt` — personal, multi-host, content-addressed backups.

mod commands;
mod config;
mod error;

use crate::config::BtConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "bt", version, about = "Personal, multi-host, content-addressed backups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Vault maintenance
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Track the current directory for backup
    Init,
    /// Stage a file or directory for the next backup (default: `.`)
    Add { path: Option<PathBuf> },
    /// Upload staged files to every vault, then mirror the metadata database
    Backup,
    /// Show per-file backup status for the current directory
    Status {
        /// Also list files whose on-disk path has vanished
        #[arg(long)]
        deleted: bool,
    },
    /// Show a file's snapshot history, newest first
    Log { file: PathBuf },
    /// Restore a historical version of FILE next to it, as FILE.<digest>
    Restore {
        file: PathBuf,
        /// Hex SHA-256 digest of the version to restore (see `bt log`)
        #[arg(long)]
        digest: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Create a default config file and generate this host's id
    Init,
    /// Print the effective configuration
    List,
}

#[derive(Subcommand)]
enum VaultAction {
    /// Initialize every configured vault and probe permissions
    Init,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bt: {e}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let home = config::home_dir()?;
    let config_path = config::config_path(std::env::var_os(config::CONFIG_ENV).map(PathBuf::from), &home);

    // `config init` must work before a config (and its log dir) exists.
    if let Command::Config { action: ConfigAction::Init } = &cli.command {
        let _guard = init_tracing(None);
        return commands::config_init(&config_path, &home);
    }

    let base_dir_override = std::env::var_os(config::BASE_DIR_ENV).map(PathBuf::from);
    let config = BtConfig::load(&config_path, base_dir_override)?;
    let _guard = init_tracing(Some(&config));

    match cli.command {
        Command::Config { action: ConfigAction::Init } => unreachable!("handled above"),
        Command::Config { action: ConfigAction::List } => commands::config_list(&config),
        Command::Vault { action: VaultAction::Init } => commands::vault_init(&config).await,
        Command::Init => commands::init(&config).await,
        Command::Add { path } => commands::add(&config, path).await,
        Command::Backup => commands::backup(&config).await,
        Command::Status { deleted } => commands::status(&config, deleted).await,
        Command::Log { file } => commands::log(&config, &file).await,
        Command::Restore { file, digest } => commands::restore(&config, &file, &digest).await,
    }
}

/// Tracing goes to stderr (filtered by `RUST_LOG`, default warnings plus
/// bt's own info) and, once a config is available, to a daily-rolled file
/// under the log directory.
fn init_tracing(config: Option<&BtConfig>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("warn,bt_cli=info,bt_fs=info,bt_meta=info,bt_service=info,bt_staging=info,bt_vault=info")
        });
    let stderr = tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr);

    let file_layer = config.and_then(|config| {
        let log_dir = config.log_dir();
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!("bt: cannot create log directory {}: {e}", log_dir.display());
            return None;
        }
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "bt.log"));
        let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
        Some((layer, guard))
    });
    match file_layer {
        Some((layer, guard)) => {
            tracing_subscriber::registry().with(filter).with(stderr).with(layer).init();
            Some(guard)
        },
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        },
    }
}
