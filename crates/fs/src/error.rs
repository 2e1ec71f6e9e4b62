//! Filesystem Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the same layout as the other bt crates.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A filesystem error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("path does not exist: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("not a regular file: {}", _0.display())]
    NotARegularFile(#[error(not(source))] PathBuf),
    #[display("not a directory: {}", _0.display())]
    NotADirectory(#[error(not(source))] PathBuf),
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// An ignore pattern failed to compile (config `ignore_list` or a
    /// `.btignore` line).
    #[display("invalid ignore pattern: {_0}")]
    InvalidPattern(#[error(not(source))] String),
    /// Checksum computation failed for the given path.
    #[display("failed to hash: {}", _0.display())]
    Digest(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
