//! Content-only file copies into the staging area.

use crate::error::{ErrorKind, Result};
use bt_vault::Digest;
use sha2::{Digest as _, Sha256};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const COPY_BUF_SIZE: usize = 8 * 1024 * 1024;

/// Copy the bytes of `src` to `dst`, computing the SHA-256 digest in the
/// same read pass. Nothing but content is preserved: the destination gets
/// fresh ownership, default permissions and fresh timestamps.
///
/// The destination is synced before returning — staged blobs are
/// write-ahead-log state and must survive a crash.
///
/// Returns the digest and the number of bytes copied.
pub async fn copy_to_staging(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<(Digest, u64)> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let mut reader = tokio::fs::File::open(src).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound(src.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(src.to_path_buf()),
        _ => ErrorKind::Io(e),
    })?;
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
    }
    let mut writer = tokio::fs::File::create(dst).await.map_err(ErrorKind::Io)?;
    let mut hasher = Sha256::new();
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let read = reader.read(&mut buf).await.map_err(ErrorKind::Io)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        writer.write_all(&buf[..read]).await.map_err(ErrorKind::Io)?;
        total += read as u64;
    }
    writer.sync_all().await.map_err(ErrorKind::Io)?;
    Ok((Digest::from_hash(hasher.finalize().into()), total))
}
