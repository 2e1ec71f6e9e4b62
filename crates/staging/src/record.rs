//! On-disk operation records.
//!
//! A record is one format-version byte followed by a JSON body. The version
//! byte is checked before any parsing: a record written by a newer bt must
//! abort the queue drain rather than be half-understood.

use crate::error::{ErrorKind, Result};
use bt_fs::FileStats;
use bt_vault::Digest;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Current record format. Bump on any incompatible change to [`Operation`]
/// (a digest algorithm migration would, for instance).
pub const FORMAT_VERSION: u8 = 1;

/// One pending backup operation: everything the commit loop needs to upload
/// the staged blob and append the snapshot, with no filesystem access to
/// the original source required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: Uuid,
    pub directory_id: Uuid,
    pub file_id: Uuid,
    /// Path relative to the tracked root, forward slashes.
    pub name: String,
    /// Digest of the staged blob, computed while copying.
    pub digest: Digest,
    /// Stats of the source file, settled across the staging copy.
    pub stats: FileStats,
    /// Absolute source path. Diagnostics only — the blob is the payload.
    pub source: PathBuf,
    /// Nanoseconds since epoch, UTC.
    pub staged_at: i64,
}

impl Operation {
    /// Serialize to the on-disk form: version byte + JSON.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![FORMAT_VERSION];
        serde_json::to_writer(&mut out, self).or_raise(|| ErrorKind::CorruptRecord(self.source.clone()))?;
        Ok(out)
    }

    /// Parse the on-disk form. `origin` is only used for error reporting.
    pub fn decode(bytes: &[u8], origin: &std::path::Path) -> Result<Self> {
        let Some((&version, body)) = bytes.split_first() else {
            exn::bail!(ErrorKind::CorruptRecord(origin.to_path_buf()));
        };
        if version != FORMAT_VERSION {
            exn::bail!(ErrorKind::UnknownFormat(version));
        }
        serde_json::from_slice(body).or_raise(|| ErrorKind::CorruptRecord(origin.to_path_buf()))
    }
}
