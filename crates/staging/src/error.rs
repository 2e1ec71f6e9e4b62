//! Staging Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the same layout as the other bt crates.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A staging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for staging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Another bt process holds the staging lock.
    #[display("staging area locked by another process: {}", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    /// The source file changed between the two stat reads that bracket the
    /// staging copy; the blob was discarded and no queue entry written.
    #[display("file mutated while staging: {}", _0.display())]
    FileMutated(#[error(not(source))] PathBuf),
    /// Queue record carries a format version this build does not know.
    /// Never guess at unknown formats; abort instead.
    #[display("unknown operation record format: {_0:#04x}")]
    UnknownFormat(#[error(not(source))] u8),
    /// Queue record exists but cannot be decoded.
    #[display("corrupt operation record: {}", _0.display())]
    CorruptRecord(#[error(not(source))] PathBuf),
    /// Reading or copying the source file failed.
    #[display("staging copy failed")]
    Copy,
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
        matches!(self, Self::FileMutated(_) | Self::Io(_))
    }
}
