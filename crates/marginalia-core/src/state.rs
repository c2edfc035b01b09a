//! Observable sync state shared with front ends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::NoteId;

/// Where the sync engine is in its cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    #[default]
    Idle,
    /// Collecting and encrypting pending records
    Batching,
    /// Waiting on the remote store
    InFlight,
    /// Applying the remote reply locally
    Reconciling,
    /// Last attempt failed; a retry is scheduled
    Failed,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Batching => "batching",
            Self::InFlight => "in-flight",
            Self::Reconciling => "reconciling",
            Self::Failed => "failed",
        }
    }

    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Batching | Self::InFlight | Self::Reconciling)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on the engine's status channel
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub next_retry_in: Option<Duration>,
    /// Local records awaiting confirmation
    pub pending: usize,
    /// Remote notes that could not be decrypted with the current key
    pub undecryptable: Vec<NoteId>,
}
