use crate::error::Error;
use crate::models::datetime;
use bt_vault::Digest;
use exn::ResultExt;
use time::UtcDateTime;

/// An immutable blob reference: a digest the vaults durably hold.
///
/// The digest is the primary key; there is no synthetic identifier. A row
/// exists only after the payload's first successful upload to every vault it
/// was promised to, and rows are never updated or (without a reference
/// count of zero) deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub id: Digest,
    /// First local observation of this digest.
    pub created_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ContentRow {
    pub(crate) id: String,
    pub(crate) created_at: i64,
}

impl TryFrom<ContentRow> for Content {
    type Error = Error;
    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.parse::<Digest>().or_raise(|| crate::error::ErrorKind::InvalidData("digest"))?,
            created_at: datetime(row.created_at)?,
        })
    }
}
