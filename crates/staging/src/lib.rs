//! Crash-safe staging area for bt: a write-ahead log of pending backup
//! operations.
//!
//! Backing up one file touches three storage media — the remote vaults, the
//! local metadata database, and the staging area itself — and any of those
//! steps can die mid-flight. The WAL makes the whole sequence at-least-once:
//! a file's bytes are first copied into `staging/<op>.blob`, then an
//! operation record lands in `queue/<seq>-<op>.op` via an atomic rename
//! (the commit point of staging). From then on the operation survives any
//! crash and will be retried from the queue head until its side effects —
//! all individually idempotent — have landed and the entry is retired.
//!
//! ```text
//! (none) --stage--> QUEUED --process--> UPLOADED --dbcommit--> COMMITTED --cleanup--> (gone)
//! ```
//!
//! The queue drains strictly in sequence order and is never compacted
//! mid-operation.

mod area;
pub mod error;
mod record;

pub use crate::area::{PreparedOp, QueuedOp, StagingArea};
pub use crate::record::{FORMAT_VERSION, Operation};
