//! Filesystem vault backend.
//!
//! Stores objects as plain files under a configured root directory, using
//! the shared `content/<digest>` + `metadata/<host_id>` key layout as
//! relative paths. Useful for vaults on external drives or NFS mounts, and
//! as the reference implementation of the `Vault` contract.
//!
//! Writes are atomic: bytes land in a `<key>.tmp-<rand>` sibling first and
//! are renamed into place only after a successful sync, so a crashed upload
//! never leaves a partial object at a real key.

use crate::backend::{content_key, metadata_key, Vault};
use crate::digest::Digest;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const COPY_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Vault rooted at a local directory.
///
/// # Examples
///
/// ```no_run
/// use bt_vault::backend::FsVault;
///
/// # fn example() -> bt_vault::error::Result<()> {
/// let vault = FsVault::new("external-drive", "/mnt/backups/vault")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FsVault {
    name: String,
    root: PathBuf,
}

impl FsVault {
    /// Create a filesystem vault. The root must be an absolute path; it is
    /// created on first use by [`validate_setup`](Vault::validate_setup).
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidRoot(root.to_path_buf()));
        }
        Ok(Self {
            name: name.into(),
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Copy `source` to `key` via a temporary sibling and an atomic rename.
    async fn write_atomic(&self, key: &str, source: &Path) -> Result<()> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
        }
        let tmp = self.object_path(&format!("{key}.tmp-{:08x}", rand::random::<u32>()));
        let result = async {
            let mut src = tokio::fs::File::open(source).await.map_err(ErrorKind::Io)?;
            let mut dst = tokio::fs::File::create(&tmp).await.map_err(ErrorKind::Io)?;
            tokio::io::copy(&mut src, &mut dst).await.map_err(ErrorKind::Io)?;
            dst.sync_all().await.map_err(ErrorKind::Io)?;
            tokio::fs::rename(&tmp, &target).await.map_err(ErrorKind::Io)?;
            Ok(())
        }
        .await;
        if result.is_err() {
            // Leave no partial object behind, not even under a tmp name.
            _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

#[async_trait]
impl Vault for FsVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_content(&self, digest: &Digest, source: &Path) -> Result<()> {
        let key = content_key(digest);
        if tokio::fs::try_exists(self.object_path(&key)).await.map_err(ErrorKind::Io)? {
            tracing::debug!(vault = %self.name, %digest, "content already present; skipping upload");
            return Ok(());
        }
        let actual = Digest::of_file(source).await?;
        if actual != *digest {
            exn::bail!(ErrorKind::Corrupt {
                key,
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.write_atomic(&key, source).await
    }

    async fn get_content(&self, digest: &Digest, output: &Path) -> Result<()> {
        let key = content_key(digest);
        let stored = self.object_path(&key);
        let mut src = match tokio::fs::File::open(&stored).await {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(key)),
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        };
        // Hash while copying so corruption is caught in the same pass.
        let result: Result<Digest> = async {
            let mut dst = tokio::fs::File::create(output).await.map_err(ErrorKind::Io)?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            loop {
                let read = src.read(&mut buf).await.map_err(ErrorKind::Io)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buf[..read]);
                dst.write_all(&buf[..read]).await.map_err(ErrorKind::Io)?;
            }
            dst.flush().await.map_err(ErrorKind::Io)?;
            Ok(Digest::from_hash(hasher.finalize().into()))
        }
        .await;
        match result {
            Ok(actual) if actual == *digest => Ok(()),
            Ok(actual) => {
                _ = tokio::fs::remove_file(output).await;
                exn::bail!(ErrorKind::Corrupt {
                    key,
                    expected: digest.to_string(),
                    actual: actual.to_string(),
                })
            },
            Err(e) => {
                _ = tokio::fs::remove_file(output).await;
                Err(e)
            },
        }
    }

    async fn put_metadata(&self, host_id: &Uuid, source: &Path) -> Result<()> {
        self.write_atomic(&metadata_key(host_id), source).await
    }

    async fn get_metadata(&self, host_id: &Uuid, output: &Path) -> Result<()> {
        let key = metadata_key(host_id);
        match tokio::fs::copy(self.object_path(&key), output).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(key)),
            Err(e) => exn::bail!(ErrorKind::Io(e)),
        }
    }

    async fn validate_setup(&self) -> Result<()> {
        let auth_denied = |e: std::io::Error| match e.kind() {
            IoErrorKind::PermissionDenied => ErrorKind::AuthDenied(self.root.display().to_string()),
            _ => ErrorKind::Io(e),
        };
        for namespace in ["content", "metadata"] {
            tokio::fs::create_dir_all(self.root.join(namespace)).await.map_err(auth_denied)?;
        }
        // Round-trip a throwaway probe object to prove we can read back what
        // we write, then clean it up.
        let probe = self.root.join(format!(".probe-{:08x}", rand::random::<u32>()));
        let payload = b"bt-probe";
        tokio::fs::write(&probe, payload).await.map_err(auth_denied)?;
        let read_back = tokio::fs::read(&probe).await.map_err(auth_denied)?;
        _ = tokio::fs::remove_file(&probe).await;
        if read_back != payload {
            exn::bail!(ErrorKind::Corrupt {
                key: probe.display().to_string(),
                expected: Digest::of_bytes(payload).to_string(),
                actual: Digest::of_bytes(&read_back).to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn vault() -> (tempfile::TempDir, FsVault) {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new("test", dir.path()).unwrap();
        vault.validate_setup().await.unwrap();
        (dir, vault)
    }

    fn write_source(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_new_requires_absolute_root() {
        assert!(FsVault::new("v", "/absolute").is_ok());
        assert!(FsVault::new("v", "relative/path").is_err());
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (dir, vault) = vault().await;
        let source = write_source(&dir, "src", b"hi\n");
        let digest = Digest::of_bytes(b"hi\n");
        vault.put_content(&digest, &source).await.unwrap();
        assert!(dir.path().join("content").join(digest.as_str()).is_file());

        let output = dir.path().join("restored");
        vault.get_content(&digest, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"hi\n");
    }

    #[tokio::test]
    async fn test_put_content_is_idempotent() {
        let (dir, vault) = vault().await;
        let source = write_source(&dir, "src", b"payload");
        let digest = Digest::of_bytes(b"payload");
        vault.put_content(&digest, &source).await.unwrap();
        // Second call must succeed even if the source file is gone: the
        // object already exists and no re-upload happens.
        std::fs::remove_file(&source).unwrap();
        vault.put_content(&digest, &source).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_content_rejects_digest_mismatch() {
        let (dir, vault) = vault().await;
        let source = write_source(&dir, "src", b"actual bytes");
        let wrong = Digest::of_bytes(b"promised bytes");
        let err = vault.put_content(&wrong, &source).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Corrupt { .. }));
        // No partial object may remain.
        assert!(!dir.path().join("content").join(wrong.as_str()).exists());
    }

    #[tokio::test]
    async fn test_get_content_missing() {
        let (dir, vault) = vault().await;
        let digest = Digest::of_bytes(b"never stored");
        let err = vault.get_content(&digest, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_content_detects_corruption_and_removes_partial() {
        let (dir, vault) = vault().await;
        let digest = Digest::of_bytes(b"original");
        // Corrupt the stored object behind the vault's back.
        let stored = dir.path().join("content").join(digest.as_str());
        std::fs::write(&stored, b"tampered").unwrap();

        let output = dir.path().join("out");
        let err = vault.get_content(&digest, &output).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::Corrupt { .. }));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_metadata_round_trip_overwrites() {
        let (dir, vault) = vault().await;
        let host = Uuid::new_v4();
        let output = dir.path().join("meta-out");

        let err = vault.get_metadata(&host, &output).await.unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotFound(_)));

        let first = write_source(&dir, "db1", b"metadata v1");
        vault.put_metadata(&host, &first).await.unwrap();
        let second = write_source(&dir, "db2", b"metadata v2");
        vault.put_metadata(&host, &second).await.unwrap();

        vault.get_metadata(&host, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"metadata v2");
    }

    #[tokio::test]
    async fn test_validate_setup_is_idempotent() {
        let (_dir, vault) = vault().await;
        vault.validate_setup().await.unwrap();
        vault.validate_setup().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_tmp_litter_after_puts() {
        let (dir, vault) = vault().await;
        let source = write_source(&dir, "src", b"bytes");
        vault.put_content(&Digest::of_bytes(b"bytes"), &source).await.unwrap();
        let leftovers: Vec<_> = walk_files(dir.path())
            .into_iter()
            .filter(|p| p.to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty(), "tmp files left behind: {leftovers:?}");
    }

    fn walk_files(root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out
    }
}
