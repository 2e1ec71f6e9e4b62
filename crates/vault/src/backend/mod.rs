//! Vault trait and backend implementations.
//!
//! This module defines the `Vault` trait, the uniform contract every storage
//! backend implements, plus the serde-friendly configuration union the CLI
//! deserializes `[[vault]]` blocks into.

mod fs;
#[cfg(feature = "mock")]
mod mock;
mod s3;

pub use self::fs::FsVault;
#[cfg(feature = "mock")]
pub use self::mock::MockVault;
pub use self::s3::{S3Options, S3Vault};
use crate::digest::Digest;
use crate::error::Result;
use crate::VaultHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Key of a content object. The digest is the identity, so every backend
/// derives the same key for the same bytes.
pub fn content_key(digest: &Digest) -> String {
    format!("content/{digest}")
}

/// Key of a host's metadata slot.
pub fn metadata_key(host_id: &Uuid) -> String {
    format!("metadata/{host_id}")
}

/// Uniform contract over vault backends.
///
/// All payload methods stream between the object store and local file paths;
/// none of them buffer whole objects in memory. Content operations verify
/// the SHA-256 digest on both directions of travel:
///
/// - [`put_content`](Self::put_content) hashes the source file before upload
///   and fails `Corrupt` if it doesn't match the key it was asked to store
///   under. If the object already exists the call succeeds without
///   re-uploading.
/// - [`get_content`](Self::get_content) hashes while downloading and deletes
///   the partial output file on mismatch.
///
/// Metadata operations are plain slot writes keyed by host id; the payload
/// is opaque to the vault.
///
/// # Examples
///
/// ```no_run
/// use bt_vault::{Digest, Vault};
/// use std::path::Path;
///
/// async fn upload(vault: &dyn Vault, blob: &Path) -> bt_vault::error::Result<Digest> {
///     let digest = Digest::of_file(blob).await?;
///     vault.put_content(&digest, blob).await?;
///     Ok(digest)
/// }
/// ```
#[async_trait]
pub trait Vault: Send + Sync {
    /// Name of the configured vault (used for logging and restore-order
    /// reporting only; uniqueness is not enforced).
    fn name(&self) -> &str;

    /// Upload the bytes at `source` under `content/<digest>`.
    ///
    /// Idempotent: succeeds without re-upload when the object exists. The
    /// implementation must leave no observable partial object on failure.
    async fn put_content(&self, digest: &Digest, source: &Path) -> Result<()>;

    /// Download `content/<digest>` to `output`, verifying the payload hash.
    ///
    /// On digest mismatch the partial output file is removed and the call
    /// fails `Corrupt`.
    async fn get_content(&self, digest: &Digest, output: &Path) -> Result<()>;

    /// Upload the metadata database at `source` to this host's slot,
    /// overwriting any previous copy. Backends may retain prior versions
    /// out-of-band (e.g. S3 bucket versioning).
    async fn put_metadata(&self, host_id: &Uuid, source: &Path) -> Result<()>;

    /// Download the most recent metadata blob for `host_id` to `output`.
    /// Fails `NotFound` if the host has never uploaded one.
    async fn get_metadata(&self, host_id: &Uuid, output: &Path) -> Result<()>;

    /// Idempotent backend initialization and permission probe: create the
    /// key namespaces if needed, round-trip a probe object, delete it.
    async fn validate_setup(&self) -> Result<()>;
}

/// Backend configuration, a discriminated union over `kind`.
///
/// This is the shape `[[vault]]` blocks in `bt.toml` deserialize into.
/// Unknown keys are rejected so a typo'd field fails loudly at startup
/// instead of silently falling back to a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum VaultConfig {
    /// Objects under a directory on a local (or locally-mounted) filesystem.
    Fs {
        #[serde(default)]
        name: Option<String>,
        /// Absolute path to the vault root.
        root: PathBuf,
    },
    /// Objects in an S3-compatible bucket.
    S3 {
        #[serde(default)]
        name: Option<String>,
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        /// Custom endpoint for non-AWS services (Backblaze, MinIO, Tigris).
        #[serde(default)]
        endpoint: Option<String>,
        /// Explicit credentials. When absent, the SDK default provider chain
        /// applies (env vars, ~/.aws/credentials, instance metadata).
        #[serde(default)]
        key_id: Option<String>,
        #[serde(default)]
        key_secret: Option<String>,
        /// Optional separate bucket/prefix for metadata slots, so content
        /// and metadata can carry different lifecycle or storage-class
        /// policies.
        #[serde(default)]
        metadata_bucket: Option<String>,
        #[serde(default)]
        metadata_prefix: Option<String>,
    },
}

impl VaultConfig {
    /// Display name: the explicit `name` field, or a kind-derived default.
    pub fn name(&self) -> &str {
        match self {
            Self::Fs { name, .. } => name.as_deref().unwrap_or("fs"),
            Self::S3 { name, .. } => name.as_deref().unwrap_or("s3"),
        }
    }
}

/// Construct a backend handle from its configuration.
pub async fn connect(config: &VaultConfig) -> Result<VaultHandle> {
    Ok(match config {
        VaultConfig::Fs { root, .. } => Arc::new(FsVault::new(config.name(), root)?),
        VaultConfig::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            key_id,
            key_secret,
            metadata_bucket,
            metadata_prefix,
            ..
        } => Arc::new(
            S3Vault::new(s3::S3Options {
                name: config.name().to_string(),
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                key_id: key_id.clone(),
                key_secret: key_secret.clone(),
                metadata_bucket: metadata_bucket.clone(),
                metadata_prefix: metadata_prefix.clone(),
            })
            .await?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_layout() {
        let digest = Digest::of_bytes(b"x");
        assert_eq!(content_key(&digest), format!("content/{digest}"));
    }

    #[test]
    fn test_metadata_key_layout() {
        let host = Uuid::nil();
        assert_eq!(metadata_key(&host), "metadata/00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_config_fs_from_toml() {
        let config: VaultConfig = toml::from_str("kind = \"fs\"\nroot = \"/mnt/vault\"").unwrap();
        assert_eq!(
            config,
            VaultConfig::Fs {
                name: None,
                root: PathBuf::from("/mnt/vault")
            }
        );
        assert_eq!(config.name(), "fs");
    }

    #[test]
    fn test_config_s3_from_toml() {
        let toml = r#"
            kind = "s3"
            name = "offsite"
            bucket = "backups"
            prefix = "bt"
            region = "us-west-004"
            endpoint = "https://s3.us-west-004.backblazeb2.com"
            key_id = "kid"
            key_secret = "shh"
        "#;
        let config: VaultConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.name(), "offsite");
        assert!(matches!(config, VaultConfig::S3 { ref bucket, .. } if bucket == "backups"));
    }

    #[test]
    fn test_config_rejects_unknown_keys() {
        let toml = "kind = \"fs\"\nroot = \"/mnt/vault\"\nbuckets = \"typo\"";
        assert!(toml::from_str::<VaultConfig>(toml).is_err());
    }
}
