//! CLI Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, following the same layout as the other bt crates.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("no config found at {} (run `bt config init` first)", _0.display())]
    ConfigMissing(#[error(not(source))] PathBuf),
    /// Parse failure, unknown key, or an unusable value. Never guessed
    /// around: a broken config fails the whole run.
    #[display("invalid config: {_0}")]
    ConfigInvalid(#[error(not(source))] String),
    #[display("cannot determine home directory ($HOME unset)")]
    NoHome,
    #[display("not a valid SHA-256 digest: {_0:?}")]
    InvalidDigest(#[error(not(source))] String),
    /// Some files could not be staged; the rest went through.
    #[display("{_0}")]
    Partial(#[error(not(source))] String),
    #[display("service operation failed")]
    Service,
    #[display("vault operation failed")]
    Vault,
    #[display("metadata store operation failed")]
    Meta,
    #[display("staging area operation failed")]
    Staging,
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
        matches!(self, Self::Service | Self::Vault | Self::Io(_))
    }
}
