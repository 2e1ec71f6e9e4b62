//! SQLite metadata database for bt.
//!
//! This crate owns the local source of truth about what has been backed up:
//! tracked directory roots, the files beneath them, every file's append-only
//! snapshot history, and the content digests those snapshots reference.
//!
//! # Architecture
//! Four entity types:
//! - **Directory**: a tracked root on this host. Tracked paths form an
//!   antichain under the prefix order — tracking an ancestor of existing
//!   roots *consolidates* them into the new root.
//! - **File**: a filesystem entry inside a tracked root, identified by
//!   `(directory, relative name)`.
//! - **FileSnapshot**: an immutable point-in-time record of a file's content
//!   digest and stat metadata. Never mutated after insert.
//! - **Content**: a digest the vaults durably hold. Rows appear only after
//!   the payload's first successful upload, and are insert-only.
//!
//! Unlike a cache, this database cannot be rebuilt from the filesystem — it
//! holds history the disk no longer has. It is therefore mirrored to every
//! configured vault after each backup cycle (via [`Database::vacuum_into`],
//! never the live file).

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{Content, Directory, File, FileSnapshot};
pub use crate::repo::Repository;
