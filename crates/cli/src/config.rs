//! Typed configuration.
//!
//! The config file is parsed once at startup into [`BtConfig`]; unknown keys
//! fail with a diagnostic instead of being silently dropped. Two environment
//! variables override file values: `BT_CONFIG` (config path) and
//! `BT_BASE_DIR` (state directory).

use crate::error::{ErrorKind, Result};
use bt_vault::VaultConfig;
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CONFIG_ENV: &str = "BT_CONFIG";
pub const BASE_DIR_ENV: &str = "BT_BASE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BtConfig {
    /// Identifies this machine's metadata namespace in every vault.
    pub host_id: Uuid,
    /// State directory: metadata database, staging WAL, logs, lock file.
    pub base_dir: PathBuf,
    /// Log file directory; defaults to `<base_dir>/log`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Global ignore patterns, gitignore syntax, applied to every tracked
    /// root (per-directory `.btignore` files take precedence).
    #[serde(default)]
    pub ignore_list: Vec<String>,
    #[serde(default, rename = "vault")]
    pub vaults: Vec<VaultConfig>,
}

impl BtConfig {
    /// A fresh default config with a newly generated host id.
    pub fn generate(home: &Path) -> Self {
        Self {
            host_id: Uuid::new_v4(),
            base_dir: home.join("data").join("bt"),
            log_dir: None,
            ignore_list: Vec::new(),
            vaults: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| exn::Exn::from(ErrorKind::ConfigInvalid(e.to_string())))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| exn::Exn::from(ErrorKind::ConfigInvalid(e.to_string())))
    }

    /// Load from disk, honoring a `BT_BASE_DIR` override.
    pub fn load(path: &Path, base_dir_override: Option<PathBuf>) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exn::bail!(ErrorKind::ConfigMissing(path.to_path_buf()))
            },
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        let mut config = Self::parse(&text)?;
        if let Some(base_dir) = base_dir_override {
            config.base_dir = base_dir;
        }
        Ok(config)
    }

    /* ================ *\
    |  Directory layout  |
    \* ================ */

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join("data").join("metadata.db")
    }

    /// The staging area root; `staging/`, `queue/` and `bt.lock` live
    /// directly beneath it.
    pub fn staging_root(&self) -> &Path {
        &self.base_dir
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| self.base_dir.join("log"))
    }
}

/// Where the config file lives: `$BT_CONFIG`, else `~/.config/bt.toml`.
pub fn config_path(env_override: Option<PathBuf>, home: &Path) -> PathBuf {
    env_override.unwrap_or_else(|| home.join(".config").join("bt.toml"))
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).ok_or_raise(|| ErrorKind::NoHome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        host_id = "5f8b3a21-6f24-4e44-9afb-2f0c2ee7e6a1"
        base_dir = "/home/me/data/bt"
    "#;

    #[test]
    fn test_parse_minimal() {
        let config = BtConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.base_dir, Path::new("/home/me/data/bt"));
        assert!(config.vaults.is_empty());
        assert!(config.ignore_list.is_empty());
        assert_eq!(config.db_path(), Path::new("/home/me/data/bt/data/metadata.db"));
        assert_eq!(config.log_dir(), Path::new("/home/me/data/bt/log"));
    }

    #[test]
    fn test_parse_full() {
        let text = r#"
            host_id = "5f8b3a21-6f24-4e44-9afb-2f0c2ee7e6a1"
            base_dir = "/home/me/data/bt"
            log_dir = "/var/log/bt"
            ignore_list = ["*.tmp", "target/"]

            [[vault]]
            kind = "fs"
            root = "/mnt/backups"

            [[vault]]
            kind = "s3"
            bucket = "bt-offsite"
            region = "us-west-004"
            endpoint = "https://s3.us-west-004.backblazeb2.com"
            key_id = "kid"
            key_secret = "shh"
        "#;
        let config = BtConfig::parse(text).unwrap();
        assert_eq!(config.vaults.len(), 2);
        assert_eq!(config.log_dir(), Path::new("/var/log/bt"));
        assert_eq!(config.ignore_list, ["*.tmp", "target/"]);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let text = format!("{MINIMAL}\nbase_dirr = \"/typo\"");
        let err = BtConfig::parse(&text).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::ConfigInvalid(_)));
    }

    #[test]
    fn test_round_trip() {
        let config = BtConfig::generate(Path::new("/home/me"));
        let text = config.to_toml().unwrap();
        let back = BtConfig::parse(&text).unwrap();
        assert_eq!(back.host_id, config.host_id);
        assert_eq!(back.base_dir, Path::new("/home/me/data/bt"));
    }

    #[test]
    fn test_base_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bt.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = BtConfig::load(&path, Some(PathBuf::from("/elsewhere"))).unwrap();
        assert_eq!(config.base_dir, Path::new("/elsewhere"));
    }

    #[test]
    fn test_load_missing() {
        let err = BtConfig::load(Path::new("/no/such/bt.toml"), None).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::ConfigMissing(_)));
    }

    #[test]
    fn test_config_path_env_override() {
        let home = Path::new("/home/me");
        assert_eq!(config_path(None, home), Path::new("/home/me/.config/bt.toml"));
        assert_eq!(config_path(Some(PathBuf::from("/etc/bt.toml")), home), Path::new("/etc/bt.toml"));
    }
}
