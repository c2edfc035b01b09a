//! Note version snapshot model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Note, NoteId};

/// Why a version snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    /// Local edit overwrote earlier content
    AutoSave,
    /// A restored draft was saved over the current content
    Restore,
    /// A remote copy won over unsynced local edits
    Conflict,
    /// A remote copy replaced already-synced content
    RemoteUpdate,
    /// A remote tombstone removed the note
    RemoteDelete,
}

impl ChangeReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoSave => "auto-save",
            Self::Restore => "restore",
            Self::Conflict => "conflict",
            Self::RemoteUpdate => "remote-update",
            Self::RemoteDelete => "remote-delete",
        }
    }
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a note's content-bearing fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteVersion {
    pub note_id: NoteId,
    /// Strictly increasing per note, never reused after eviction
    pub version: u64,
    pub domain: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content_hash: String,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    pub change_reason: ChangeReason,
}

impl NoteVersion {
    /// Snapshot `note` as version number `version`
    pub fn capture(note: &Note, version: u64, reason: ChangeReason) -> Self {
        Self {
            note_id: note.id,
            version,
            domain: note.domain.clone(),
            url: note.url.clone(),
            title: note.title.clone(),
            content: note.content.clone(),
            tags: note.tags.clone(),
            content_hash: note.content_hash.clone(),
            created_at: Utc::now(),
            change_reason: reason,
        }
    }
}
