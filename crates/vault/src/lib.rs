//! Content-addressed vault storage for bt.
//!
//! A vault is a remote (or remote-ish) object store with two key namespaces:
//! - `content/<digest>` — immutable blobs, shared by value across every host
//!   that writes to the vault. Writes are idempotent: the key *is* the
//!   SHA-256 digest of the payload, so a second upload of the same bytes is
//!   a no-op.
//! - `metadata/<host_id>` — one mutable slot per host, holding that host's
//!   metadata database. Overwritten on every backup cycle.
//!
//! The `Vault` trait abstracts over backends; `FsVault` stores objects under
//! a local directory and `S3Vault` under an S3-compatible bucket. All payload
//! methods operate on file paths, never in-memory buffers, so arbitrarily
//! large files stream through fixed-size buffers.

pub mod backend;
mod digest;
pub mod error;

pub use crate::backend::{Vault, VaultConfig, connect};
pub use crate::digest::Digest;
use std::sync::Arc;

pub type VaultHandle = Arc<dyn Vault + Send + Sync>;
