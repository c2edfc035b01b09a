//! marginalia-core - Core library for Marginalia
//!
//! Local-first, end-to-end encrypted notes scoped to web domains and pages.
//! This crate holds the local store, field encryption, bounded version
//! history and the sync engine shared by the CLI and the reference API
//! server.

pub mod config;
pub mod crypto;
pub mod db;
pub mod entitlement;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;
pub mod versions;

pub use config::{EngineConfig, RemoteConfig, RetryPolicy};
pub use crypto::{EncryptedNote, EncryptionKey, Salt};
pub use entitlement::{EntitlementGate, SharedEntitlement, StaticEntitlement, Tier};
pub use error::{Error, Result};
pub use models::{ChangeReason, EditorDraft, Note, NoteId, NoteVersion};
pub use state::{SyncState, SyncStatus};
pub use store::{ApplyOutcome, LocalStore, SyncMeta};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};
