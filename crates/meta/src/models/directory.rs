use crate::error::{Error, ErrorKind};
use crate::models::{datetime, parse_uuid};
use exn::OptionExt;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use uuid::Uuid;

/// A tracked root on this host.
///
/// Paths are absolute and canonical; the set of tracked paths is an
/// antichain under the prefix order, which `Repository::create_directory`
/// maintains by consolidating subsumed children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub id: Uuid,
    pub path: PathBuf,
    pub created_at: UtcDateTime,
}

impl Directory {
    /// The name a file at `path` gets relative to this root: forward-slash
    /// separated, no leading separator.
    pub fn relative_name(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.path).ok()?;
        let name = rel.to_str()?;
        (!name.is_empty()).then(|| name.to_string())
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct DirectoryRow {
    pub(crate) id: String,
    pub(crate) path: String,
    pub(crate) created_at: i64,
}

impl TryFrom<DirectoryRow> for Directory {
    type Error = Error;
    fn try_from(row: DirectoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            path: PathBuf::from(row.path),
            created_at: datetime(row.created_at)?,
        })
    }
}

pub(crate) fn path_str(path: &Path) -> Result<&str, Error> {
    path.to_str().ok_or_raise(|| ErrorKind::InvalidData("non-UTF-8 path"))
}
