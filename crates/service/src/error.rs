//! Service Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Lower-layer errors (vault, metadata, staging,
//! filesystem) are re-raised under a service-level kind so callers see which
//! subsystem failed without losing the original tree.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A service error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The path is not inside any tracked directory.
    #[display("not inside a tracked directory: {}", _0.display())]
    NotTracked(#[error(not(source))] PathBuf),
    /// No metadata is recorded for this file.
    #[display("file is not known to bt: {}", _0.display())]
    UnknownFile(#[error(not(source))] PathBuf),
    /// No snapshot of the file carries the requested digest.
    #[display("no snapshot with digest {_0}")]
    SnapshotNotFound(#[error(not(source))] String),
    /// A backup requires at least one configured vault.
    #[display("no vaults configured")]
    NoVaults,
    /// Every configured vault failed to produce the object.
    #[display("no vault could serve digest {_0}")]
    AllVaultsFailed(#[error(not(source))] String),
    #[display("vault operation failed")]
    Vault,
    #[display("metadata store operation failed")]
    Meta,
    #[display("staging area operation failed")]
    Staging,
    #[display("filesystem operation failed")]
    Fs,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Vault | Self::Fs)
    }
}
