//! Path resolution and validation.

use crate::error::{ErrorKind, Result};
use std::path::{Path, PathBuf};

fn classify(path: &Path, err: std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        _ => ErrorKind::Io(err),
    }
}

/// Canonicalize to an absolute path, resolving symlinks and `..` segments.
/// Fails if the path does not exist.
pub fn resolve(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    Ok(std::fs::canonicalize(path).map_err(|e| classify(path, e))?)
}

/// Canonicalize and require a regular file.
pub fn resolve_file(path: impl AsRef<Path>) -> Result<PathBuf> {
    let resolved = resolve(path)?;
    if !resolved.is_file() {
        exn::bail!(ErrorKind::NotARegularFile(resolved));
    }
    Ok(resolved)
}

/// Canonicalize and require a directory.
pub fn resolve_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let resolved = resolve(path)?;
    if !resolved.is_dir() {
        exn::bail!(ErrorKind::NotADirectory(resolved));
    }
    Ok(resolved)
}

/// Require read+execute on a directory by actually opening it for listing.
/// Probing the real operation beats decoding mode bits against ancillary
/// group memberships.
pub fn require_listable(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    std::fs::read_dir(path).map_err(|e| classify(path, e))?;
    Ok(())
}
