use crate::error::Error;
use crate::models::parse_uuid;
use uuid::Uuid;

/// A filesystem entry inside a tracked directory.
///
/// `(directory_id, name)` is unique. `current_snapshot_id` is null until the
/// first successful backup commits; `deleted` flips on when the on-disk path
/// is observed to have vanished and back off when the file reappears in a
/// later backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub id: Uuid,
    pub directory_id: Uuid,
    /// Path relative to the directory root, forward slashes.
    pub name: String,
    pub current_snapshot_id: Option<Uuid>,
    pub deleted: bool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) id: String,
    pub(crate) directory_id: String,
    pub(crate) name: String,
    pub(crate) current_snapshot_id: Option<String>,
    pub(crate) deleted: bool,
}

impl TryFrom<FileRow> for File {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            directory_id: parse_uuid(&row.directory_id)?,
            name: row.name,
            current_snapshot_id: row.current_snapshot_id.as_deref().map(parse_uuid).transpose()?,
            deleted: row.deleted,
        })
    }
}
