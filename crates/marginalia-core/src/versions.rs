//! Bounded per-note version history

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::StorageBackend;
use crate::entitlement::EntitlementGate;
use crate::error::{Error, Result};
use crate::models::{ChangeReason, Note, NoteId, NoteVersion};

pub(crate) const VERSIONS_PREFIX: &str = "versions:";

pub(crate) fn versions_key(note_id: &NoteId) -> String {
    format!("{VERSIONS_PREFIX}{note_id}")
}

/// Snapshots note content before it is overwritten
pub struct VersionManager {
    backend: Arc<dyn StorageBackend>,
    entitlement: Arc<dyn EntitlementGate>,
}

impl VersionManager {
    pub fn new(backend: Arc<dyn StorageBackend>, entitlement: Arc<dyn EntitlementGate>) -> Self {
        Self {
            backend,
            entitlement,
        }
    }

    /// Load stored versions oldest first, skipping unreadable entries
    fn load(&self, note_id: &NoteId) -> Result<Vec<NoteVersion>> {
        let key = versions_key(note_id);
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(Vec::new());
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                let error = Error::StorageCorruption {
                    key,
                    reason: e.to_string(),
                };
                warn!(%error, "Discarding unreadable version history");
                return Ok(Vec::new());
            }
        };

        let mut versions: Vec<NoteVersion> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(version) => Some(version),
                Err(e) => {
                    warn!(note_id = %note_id, error = %e, "Skipping corrupt version entry");
                    None
                }
            })
            .collect();
        versions.sort_by_key(|version| version.version);
        Ok(versions)
    }

    /// Build the history that would exist after snapshotting `existing`.
    ///
    /// Nothing is written; the caller persists [`StagedVersion::write`]
    /// together with the note itself. Returns `None` when `incoming_hash`
    /// matches the current content.
    pub(crate) fn stage_snapshot(
        &self,
        existing: &Note,
        incoming_hash: &str,
        reason: ChangeReason,
    ) -> Result<Option<StagedVersion>> {
        let current_hash = existing.compute_hash();
        if current_hash == incoming_hash {
            return Ok(None);
        }

        let mut versions = self.load(&existing.id)?;
        let next = versions.last().map_or(1, |last| last.version + 1);
        let mut snapshot = NoteVersion::capture(existing, next, reason);
        snapshot.content_hash = current_hash;
        versions.push(snapshot.clone());

        let mut evicted = 0;
        if let Some(keep) = self.entitlement.current_tier().version_retention() {
            if versions.len() > keep {
                evicted = versions.len() - keep;
                versions.drain(..evicted);
            }
        }

        Ok(Some(StagedVersion {
            write: (versions_key(&existing.id), serde_json::to_string(&versions)?),
            version: snapshot,
            evicted,
        }))
    }

    /// Snapshot `existing` unless `incoming_hash` matches its content.
    ///
    /// Returns the new version, or `None` when nothing changed.
    pub fn snapshot_before_overwrite(
        &self,
        existing: &Note,
        incoming_hash: &str,
        reason: ChangeReason,
    ) -> Result<Option<NoteVersion>> {
        let Some(staged) = self.stage_snapshot(existing, incoming_hash, reason)? else {
            return Ok(None);
        };
        let (key, value) = &staged.write;
        self.backend.set(key, value)?;
        staged.log();
        Ok(Some(staged.version))
    }

    /// Versions for a note, newest first
    pub fn list_versions(&self, note_id: &NoteId) -> Result<Vec<NoteVersion>> {
        let mut versions = self.load(note_id)?;
        versions.reverse();
        Ok(versions)
    }

    pub fn get_version(&self, note_id: &NoteId, version: u64) -> Result<NoteVersion> {
        self.load(note_id)?
            .into_iter()
            .find(|candidate| candidate.version == version)
            .ok_or_else(|| Error::NotFound(format!("Version {version} of note {note_id}")))
    }

    /// Build an editable draft from a stored version.
    ///
    /// Nothing is written; `updated_at` stays as it is on `current` until the
    /// caller saves the draft. Without `current` the draft is rebuilt from the
    /// snapshot alone.
    pub fn restore(
        &self,
        note_id: &NoteId,
        version: u64,
        current: Option<&Note>,
    ) -> Result<Note> {
        let snapshot = self.get_version(note_id, version)?;

        let mut draft = current.cloned().unwrap_or_else(|| Note {
            id: snapshot.note_id,
            domain: snapshot.domain.clone(),
            url: snapshot.url.clone(),
            title: String::new(),
            content: String::new(),
            tags: Vec::new(),
            content_hash: String::new(),
            created_at: snapshot.created_at,
            updated_at: snapshot.created_at,
            is_deleted: false,
            deleted_at: None,
            sync_pending: false,
            last_synced_at: None,
        });
        draft.title = snapshot.title;
        draft.content = snapshot.content;
        draft.tags = snapshot.tags;
        draft.is_deleted = false;
        draft.deleted_at = None;
        draft.refresh_hash();
        Ok(draft)
    }

    /// Drop all history for a note
    pub fn purge_history(&self, note_id: &NoteId) -> Result<()> {
        self.backend.remove(&versions_key(note_id))
    }
}

/// A snapshot and the history write that records it
#[derive(Debug)]
pub(crate) struct StagedVersion {
    pub(crate) write: (String, String),
    pub(crate) version: NoteVersion,
    evicted: usize,
}

impl StagedVersion {
    /// Log once the write has landed
    pub(crate) fn log(&self) {
        let version = &self.version;
        if self.evicted > 0 {
            debug!(note_id = %version.note_id, evicted = self.evicted, "Evicted old versions");
        }
        debug!(
            note_id = %version.note_id,
            version = version.version,
            reason = %version.change_reason,
            "Recorded note version"
        );
    }
}
