//! Vault Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the same layout as the other bt crates.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A vault error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally: `Unreachable` is worth retrying, `AuthDenied` and `Corrupt`
/// are not.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No object at the given key.
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The backend could not be reached (network, DNS, timeout).
    #[display("vault unreachable: {_0}")]
    Unreachable(#[error(not(source))] String),
    /// The backend rejected our credentials or permissions.
    #[display("vault access denied: {_0}")]
    AuthDenied(#[error(not(source))] String),
    /// Payload bytes do not hash to the digest they are keyed under.
    #[display("corrupt object {key}: expected digest {expected}, found {actual}")]
    Corrupt {
        key: String,
        expected: String,
        actual: String,
    },
    /// Not a 64-character lowercase hex SHA-256 digest.
    #[display("invalid digest: {_0:?}")]
    InvalidDigest(#[error(not(source))] String),
    /// Filesystem vault root is unusable (not absolute, not a directory).
    #[display("invalid vault root: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    /// Underlying I/O error.
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
        matches!(self, Self::Unreachable(_) | Self::Io(_))
    }
}
