//! In-memory vault backend for testing.

use crate::backend::{content_key, metadata_key, Vault};
use crate::digest::Digest;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory vault for tests.
///
/// Objects live in a `HashMap` behind a [`RwLock`], so all trait methods
/// operate on `&self` without external synchronisation. The mock counts
/// actual uploads (existence-check short-circuits excluded) so dedup
/// behaviour can be asserted, and can be switched into a failing mode to
/// exercise the orchestrator's stop-at-head error handling.
///
/// # Examples
///
/// ```
/// use bt_vault::backend::{MockVault, Vault};
/// use bt_vault::Digest;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> bt_vault::error::Result<()> {
/// let dir = tempfile::tempdir().unwrap();
/// let blob = dir.path().join("blob");
/// std::fs::write(&blob, b"hi\n").unwrap();
///
/// let vault = MockVault::default();
/// let digest = Digest::of_bytes(b"hi\n");
/// vault.put_content(&digest, &blob).await?;
/// vault.put_content(&digest, &blob).await?;
/// assert_eq!(vault.uploads(), 1); // second put was a no-op
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockVault {
    name: String,
    objects: RwLock<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MockVault {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of content uploads that actually transferred bytes.
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// When set, every `put_content`/`put_metadata` fails `Unreachable`.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Raw bytes stored under a key, if any.
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_failure_mode(&self) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unreachable(format!("{}: injected failure", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Vault for MockVault {
    fn name(&self) -> &str {
        if self.name.is_empty() { "mock" } else { &self.name }
    }

    async fn put_content(&self, digest: &Digest, source: &Path) -> Result<()> {
        self.check_failure_mode()?;
        let key = content_key(digest);
        if self.objects.read().await.contains_key(&key) {
            return Ok(());
        }
        let bytes = tokio::fs::read(source).await.map_err(ErrorKind::Io)?;
        let actual = Digest::of_bytes(&bytes);
        if actual != *digest {
            exn::bail!(ErrorKind::Corrupt {
                key,
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.objects.write().await.insert(key, bytes);
        Ok(())
    }

    async fn get_content(&self, digest: &Digest, output: &Path) -> Result<()> {
        let key = content_key(digest);
        let bytes = self.object(&key).await.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key)))?;
        tokio::fs::write(output, bytes).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn put_metadata(&self, host_id: &Uuid, source: &Path) -> Result<()> {
        self.check_failure_mode()?;
        let bytes = tokio::fs::read(source).await.map_err(ErrorKind::Io)?;
        self.objects.write().await.insert(metadata_key(host_id), bytes);
        Ok(())
    }

    async fn get_metadata(&self, host_id: &Uuid, output: &Path) -> Result<()> {
        let key = metadata_key(host_id);
        let bytes = self.object(&key).await.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key)))?;
        tokio::fs::write(output, bytes).await.map_err(ErrorKind::Io)?;
        Ok(())
    }

    async fn validate_setup(&self) -> Result<()> {
        self.check_failure_mode()
    }
}
