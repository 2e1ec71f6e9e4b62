//! File stat collection.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Point-in-time stat record for a regular file.
///
/// Timestamps are nanoseconds since the Unix epoch, UTC. Nanosecond
/// precision matters: the mutated-during-stage check compares two stat
/// reads taken milliseconds apart, and second-granularity mtimes would hide
/// exactly the fast successive writes it exists to catch. `born_at` is
/// nullable because not every filesystem reports a birth time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub size: u64,
    /// Permission bits only (`st_mode & 0o7777`); the file-type bits are
    /// implied by the walk only yielding regular files.
    pub permissions: u32,
    pub uid: u32,
    pub gid: u32,
    pub accessed_at: i64,
    pub modified_at: i64,
    pub changed_at: i64,
    pub born_at: Option<i64>,
}

fn nanos(secs: i64, nsec: i64) -> i64 {
    secs.saturating_mul(1_000_000_000).saturating_add(nsec)
}

impl FileStats {
    /// Stat a regular file without following a final symlink.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::symlink_metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        })?;
        if !meta.is_file() {
            exn::bail!(ErrorKind::NotARegularFile(path.to_path_buf()));
        }
        let born_at = meta.created().ok().and_then(|t| {
            t.duration_since(UNIX_EPOCH).ok().and_then(|d| i64::try_from(d.as_nanos()).ok())
        });
        Ok(Self {
            size: meta.size(),
            permissions: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            accessed_at: nanos(meta.atime(), meta.atime_nsec()),
            modified_at: nanos(meta.mtime(), meta.mtime_nsec()),
            changed_at: nanos(meta.ctime(), meta.ctime_nsec()),
            born_at,
        })
    }

    /// Field-by-field equality, atime excluded.
    ///
    /// Reading a file bumps its atime, so two stat reads that bracket a copy
    /// legitimately differ there; any other difference means the file was
    /// mutated between the reads.
    pub fn same_ignoring_atime(&self, other: &Self) -> bool {
        self.size == other.size
            && self.permissions == other.permissions
            && self.uid == other.uid
            && self.gid == other.gid
            && self.modified_at == other.modified_at
            && self.changed_at == other.changed_at
            && self.born_at == other.born_at
    }

    /// The cheap change heuristic used by `status` and the stage-time
    /// unchanged check: size, mtime and ctime against a recorded snapshot.
    pub fn same_version(&self, size: u64, modified_at: i64, changed_at: i64) -> bool {
        self.size == size && self.modified_at == modified_at && self.changed_at == changed_at
    }

    pub fn modified(&self) -> SystemTime {
        offset(self.modified_at)
    }

    pub fn accessed(&self) -> SystemTime {
        offset(self.accessed_at)
    }
}

fn offset(nanos: i64) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + std::time::Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - std::time::Duration::from_nanos(nanos.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"12345").unwrap();
        let stats = FileStats::read(&path).unwrap();
        assert_eq!(stats.size, 5);
        assert!(stats.modified_at > 0);
        assert!(stats.permissions <= 0o7777);
    }

    #[test]
    fn test_read_missing() {
        let err = FileStats::read("/no/such/file").unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_read_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileStats::read(dir.path()).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotARegularFile(_)));
    }

    #[test]
    fn test_read_does_not_follow_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"real").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        let err = FileStats::read(&link).unwrap_err();
        assert!(matches!(err.current_value(), ErrorKind::NotARegularFile(_)));
    }

    #[test]
    fn test_same_ignoring_atime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"stable").unwrap();
        let first = FileStats::read(&path).unwrap();
        let mut second = first;
        second.accessed_at += 1_000;
        assert!(first.same_ignoring_atime(&second));
        second.size += 1;
        assert!(!first.same_ignoring_atime(&second));
    }

    #[test]
    fn test_mutation_detected_between_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"before").unwrap();
        let first = FileStats::read(&path).unwrap();
        std::fs::write(&path, b"after, and longer").unwrap();
        let second = FileStats::read(&path).unwrap();
        assert!(!first.same_ignoring_atime(&second));
    }

    #[test]
    fn test_serde_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"bytes").unwrap();
        let stats = FileStats::read(&path).unwrap();
        let json = serde_json::to_string(&stats).unwrap();
        let back: FileStats = serde_json::from_str(&json).unwrap();
        assert_eq!(stats, back);
    }
}
