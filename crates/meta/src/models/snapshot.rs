use crate::error::{Error, ErrorKind};
use crate::models::{datetime, parse_uuid};
use bt_fs::FileStats;
use bt_vault::Digest;
use exn::ResultExt;
use time::UtcDateTime;
use uuid::Uuid;

/// Point-in-time record of a file: its content digest plus the stat
/// metadata needed to restore it faithfully.
///
/// Snapshots are append-only — never mutated after insert — so a file's
/// history is the ordered list of its snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub id: Uuid,
    pub file_id: Uuid,
    pub content_id: Digest,
    /// When this snapshot was recorded locally.
    pub created_at: UtcDateTime,
    pub stats: FileStats,
}

#[derive(sqlx::FromRow)]
pub(crate) struct SnapshotRow {
    pub(crate) id: String,
    pub(crate) file_id: String,
    pub(crate) content_id: String,
    pub(crate) created_at: i64,
    pub(crate) size: i64,
    pub(crate) permissions: i64,
    pub(crate) uid: i64,
    pub(crate) gid: i64,
    pub(crate) accessed_at: i64,
    pub(crate) modified_at: i64,
    pub(crate) changed_at: i64,
    pub(crate) born_at: Option<i64>,
}

impl TryFrom<SnapshotRow> for FileSnapshot {
    type Error = Error;
    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            file_id: parse_uuid(&row.file_id)?,
            content_id: row.content_id.parse::<Digest>().or_raise(|| ErrorKind::InvalidData("digest"))?,
            created_at: datetime(row.created_at)?,
            stats: FileStats {
                size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("size"))?,
                permissions: u32::try_from(row.permissions).or_raise(|| ErrorKind::InvalidData("permissions"))?,
                uid: u32::try_from(row.uid).or_raise(|| ErrorKind::InvalidData("uid"))?,
                gid: u32::try_from(row.gid).or_raise(|| ErrorKind::InvalidData("gid"))?,
                accessed_at: row.accessed_at,
                modified_at: row.modified_at,
                changed_at: row.changed_at,
                born_at: row.born_at,
            },
        })
    }
}
