//! Editor draft model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NoteId;

/// Unsaved editor state, persisted locally and never synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorDraft {
    /// Note being edited, `None` for a new note
    #[serde(default)]
    pub note_id: Option<NoteId>,
    pub domain: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

impl EditorDraft {
    pub fn new(domain: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            note_id: None,
            domain: domain.into(),
            url: None,
            title: String::new(),
            content: content.into(),
            tags: Vec::new(),
            saved_at: Utc::now(),
        }
    }
}
