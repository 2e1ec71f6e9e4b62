//! Local filesystem facade for bt.
//!
//! Everything the backup engine needs to know about the disk lives here:
//! path canonicalization, stat collection (with nanosecond timestamps, since
//! the mutated-during-stage check compares them field by field), ignore
//! rules, directory walking, and the hash-while-copying primitive used to
//! fill the staging area.

mod copy;
pub mod error;
mod matcher;
mod resolve;
mod stats;
mod walk;

pub use crate::copy::copy_to_staging;
pub use crate::matcher::{IGNORE_FILE_NAME, IgnoreRules};
pub use crate::resolve::{require_listable, resolve, resolve_dir, resolve_file};
pub use crate::stats::FileStats;
pub use crate::walk::{walk, walk_unfiltered};
pub use bt_vault::Digest;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::Path;

/// Hex SHA-256 digest of a file's contents, streamed through a fixed-size
/// buffer so file size never matters.
pub async fn digest_of(path: impl AsRef<Path>) -> Result<Digest> {
    Digest::of_file(path.as_ref()).await.or_raise(|| ErrorKind::Digest(path.as_ref().to_path_buf()))
}
