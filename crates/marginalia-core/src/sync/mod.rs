//! Local-first synchronization with a remote store.
//!
//! A cycle moves `Idle → Batching → InFlight → Reconciling → Idle`, or to
//! `Failed` with a scheduled retry. Pending notes and tombstones are
//! encrypted into one batch, sent in a single idempotent reconcile call, and
//! the reply is applied through [`crate::store::LocalStore`] under
//! last-write-wins.

mod batch;
mod engine;

pub use batch::{batch_id, SyncBatch};
pub use engine::{SkipReason, SyncEngine, SyncHandle, SyncOutcome, SyncReport};
