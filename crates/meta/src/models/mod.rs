mod content;
mod directory;
mod file;
mod snapshot;

pub use self::content::Content;
pub(crate) use self::content::ContentRow;
pub use self::directory::Directory;
pub(crate) use self::directory::{DirectoryRow, path_str};
pub use self::file::File;
pub(crate) use self::file::FileRow;
pub use self::snapshot::FileSnapshot;
pub(crate) use self::snapshot::SnapshotRow;

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;
use uuid::Uuid;

/// Timestamps are persisted as 64-bit nanoseconds since epoch, UTC.
pub(crate) fn nanos(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("timestamp out of range"))
}

pub(crate) fn datetime(nanos: i64) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn parse_uuid(value: &str) -> std::result::Result<Uuid, Error> {
    Uuid::parse_str(value).or_raise(|| ErrorKind::InvalidData("uuid"))
}
