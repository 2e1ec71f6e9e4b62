//! Metadata Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the same layout as the other bt crates.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong
/// internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A row held a value the domain model cannot represent.
    #[display("invalid metadata: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// The path (or an ancestor of it) is already a tracked directory.
    #[display("already tracked: {}", _0.display())]
    AlreadyTracked(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
