//! Local-first note store.
//!
//! Notes are persisted per domain under `notes:<domain>` as a JSON array and
//! mirrored in an in-memory index that serves every read. Each mutation
//! rewrites the affected partitions, plus the note's version history when a
//! snapshot is taken, in one atomic backend write before the index is
//! updated, so a failed write leaves all of them untouched.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::db::StorageBackend;
use crate::entitlement::EntitlementGate;
use crate::error::{Error, Result};
use crate::models::{normalize_tags, ChangeReason, EditorDraft, Note, NoteId, NoteVersion};
use crate::util::{domain_of_url, normalize_domain, normalize_page_url};
use crate::versions::{StagedVersion, VersionManager, VERSIONS_PREFIX};

const NOTES_PREFIX: &str = "notes:";
const EDITOR_DRAFT_KEY: &str = "editor_draft";
const SYNC_META_KEY: &str = "sync_meta";

fn partition_key(domain: &str) -> String {
    format!("{NOTES_PREFIX}{domain}")
}

/// Next `updated_at` for a record last stamped at `previous`.
///
/// Never goes backwards, and always moves past `previous` so that an edit is
/// distinguishable from the state it replaced.
fn next_stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(previous) if now <= previous => previous + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

/// Device-local sync bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Stable per-install identifier, mixed into batch ids
    pub device_id: String,
    /// Server clock of the last fully applied pull, sent as `since`
    #[serde(default)]
    pub last_server_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    fn fresh() -> Self {
        Self {
            device_id: uuid::Uuid::now_v7().to_string(),
            last_server_time: None,
            last_synced_at: None,
        }
    }
}

/// What applying a remote record did locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Note was absent locally
    Inserted,
    /// Synced local content was replaced
    Updated,
    /// Unsynced local edits lost; a `conflict` version holds them
    Conflict,
    /// Remote tombstone removed the local copy
    Deleted,
    /// Local copy is newer, or there was nothing to delete
    Skipped,
}

/// Authoritative local note store
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    versions: VersionManager,
    index: RwLock<HashMap<NoteId, Note>>,
    changes: Arc<Notify>,
    epoch: AtomicU64,
    skipped_on_load: AtomicUsize,
}

impl LocalStore {
    /// Open the store and rebuild the index from `backend`
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        entitlement: Arc<dyn EntitlementGate>,
    ) -> Result<Self> {
        let store = Self {
            versions: VersionManager::new(backend.clone(), entitlement),
            backend,
            index: RwLock::new(HashMap::new()),
            changes: Arc::new(Notify::new()),
            epoch: AtomicU64::new(0),
            skipped_on_load: AtomicUsize::new(0),
        };
        let loaded = store.load_all()?;
        info!(notes = loaded.len(), "Local store opened");
        Ok(store)
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, HashMap<NoteId, Note>>> {
        self.index.read().map_err(|_| Error::poisoned())
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, HashMap<NoteId, Note>>> {
        self.index.write().map_err(|_| Error::poisoned())
    }

    /// Write guard, provided the store is still at `epoch`.
    ///
    /// The epoch only moves under the write guard, so the check holds for
    /// as long as the guard is kept.
    fn write_index_at(&self, epoch: u64) -> Result<RwLockWriteGuard<'_, HashMap<NoteId, Note>>> {
        let index = self.write_index()?;
        if self.epoch() != epoch {
            debug!(expected = epoch, current = self.epoch(), "Dropping write from an older epoch");
            return Err(Error::Superseded);
        }
        Ok(index)
    }

    /// Rebuild the index from durable storage.
    ///
    /// Returns every record, tombstones included, newest first. Unreadable
    /// partitions and entries are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Note>> {
        let mut loaded: HashMap<NoteId, Note> = HashMap::new();
        let mut skipped = 0usize;

        for key in self.backend.keys_with_prefix(NOTES_PREFIX)? {
            let Some(raw) = self.backend.get(&key)? else {
                continue;
            };
            let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    let error = Error::StorageCorruption {
                        key: key.clone(),
                        reason: e.to_string(),
                    };
                    warn!(%error, "Skipping unreadable note partition");
                    skipped += 1;
                    continue;
                }
            };

            for entry in entries {
                let mut note: Note = match serde_json::from_value(entry) {
                    Ok(note) => note,
                    Err(e) => {
                        let error = Error::StorageCorruption {
                            key: key.clone(),
                            reason: e.to_string(),
                        };
                        warn!(%error, "Skipping unreadable note entry");
                        skipped += 1;
                        continue;
                    }
                };
                if note.content_hash != note.compute_hash() {
                    debug!(note_id = %note.id, "Refreshing stale content hash");
                    note.refresh_hash();
                }
                match loaded.get(&note.id) {
                    Some(existing) if existing.updated_at >= note.updated_at => {}
                    _ => {
                        loaded.insert(note.id, note);
                    }
                }
            }
        }

        let mut notes: Vec<Note> = loaded.values().cloned().collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        *self.write_index()? = loaded;
        self.skipped_on_load.store(skipped, Ordering::SeqCst);
        if skipped > 0 {
            warn!(skipped, "Some stored notes could not be read");
        }
        Ok(notes)
    }

    /// Number of partitions or entries skipped by the last load
    pub fn skipped_on_load(&self) -> usize {
        self.skipped_on_load.load(Ordering::SeqCst)
    }

    /// Persist `upserts` and `removals`, then apply them to `index`
    fn commit(
        &self,
        index: &mut HashMap<NoteId, Note>,
        upserts: Vec<Note>,
        removals: &[NoteId],
    ) -> Result<()> {
        self.commit_with_history(index, upserts, removals, None)
    }

    /// [`LocalStore::commit`] that also lands a staged version snapshot
    fn commit_with_history(
        &self,
        index: &mut HashMap<NoteId, Note>,
        upserts: Vec<Note>,
        removals: &[NoteId],
        history: Option<StagedVersion>,
    ) -> Result<()> {
        let mut domains = BTreeSet::new();
        for note in &upserts {
            domains.insert(note.domain.clone());
            if let Some(previous) = index.get(&note.id) {
                domains.insert(previous.domain.clone());
            }
        }
        for id in removals {
            if let Some(previous) = index.get(id) {
                domains.insert(previous.domain.clone());
            }
        }

        let changed: HashSet<NoteId> = upserts
            .iter()
            .map(|note| note.id)
            .chain(removals.iter().copied())
            .collect();

        let mut writes = Vec::new();
        let mut removed_keys = Vec::new();
        for domain in &domains {
            let mut partition: Vec<&Note> = index
                .values()
                .filter(|note| &note.domain == domain && !changed.contains(&note.id))
                .chain(upserts.iter().filter(|note| &note.domain == domain))
                .collect();
            partition.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

            let key = partition_key(domain);
            if partition.is_empty() {
                removed_keys.push(key);
            } else {
                writes.push((key, serde_json::to_string(&partition)?));
            }
        }

        if let Some(staged) = &history {
            writes.push(staged.write.clone());
        }
        self.backend.set_many(&writes, &removed_keys)?;
        if let Some(staged) = &history {
            staged.log();
        }

        for id in removals {
            index.remove(id);
        }
        for note in upserts {
            index.insert(note.id, note);
        }
        Ok(())
    }

    fn notify_change(&self) {
        self.changes.notify_one();
    }

    /// Signal fired after every local mutation
    pub fn change_signal(&self) -> Arc<Notify> {
        self.changes.clone()
    }

    /// Bumped by [`LocalStore::clear_all`] and [`LocalStore::bump_epoch`]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate sync writes planned under the current epoch
    pub fn bump_epoch(&self) -> Result<u64> {
        let _index = self.write_index()?;
        Ok(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub const fn versions(&self) -> &VersionManager {
        &self.versions
    }

    /// Save a local edit
    pub fn save(&self, note: Note) -> Result<Note> {
        self.save_with_reason(note, ChangeReason::AutoSave)
    }

    /// Save a local edit, tagging any snapshot with `reason`.
    ///
    /// Normalizes domain, URL and tags, stamps a monotonic `updated_at`,
    /// snapshots the previous content when it changes and marks the note
    /// pending.
    pub fn save_with_reason(&self, mut note: Note, reason: ChangeReason) -> Result<Note> {
        note.url = note.url.as_deref().and_then(normalize_page_url);
        note.domain = normalize_domain(&note.domain)
            .or_else(|| note.url.as_deref().and_then(domain_of_url))
            .ok_or_else(|| Error::InvalidInput("Note domain must not be empty".into()))?;
        note.tags = normalize_tags(&note.tags, &note.content);
        note.refresh_hash();

        let mut index = self.write_index()?;
        let mut history = None;
        match index.get(&note.id) {
            Some(existing) => {
                history = self
                    .versions
                    .stage_snapshot(existing, &note.content_hash, reason)?;
                note.created_at = existing.created_at;
                note.last_synced_at = existing.last_synced_at;
                note.updated_at = next_stamp(Some(existing.updated_at));
            }
            None => {
                note.updated_at = next_stamp(None).max(note.created_at);
            }
        }
        note.is_deleted = false;
        note.deleted_at = None;
        note.sync_pending = true;

        self.commit_with_history(&mut index, vec![note.clone()], &[], history)?;
        drop(index);

        debug!(note_id = %note.id, domain = %note.domain, "Saved note");
        self.notify_change();
        Ok(note)
    }

    /// Tombstone a note. Deleting a tombstone returns it unchanged.
    pub fn delete(&self, id: &NoteId) -> Result<Note> {
        let mut index = self.write_index()?;
        let existing = index
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Note {id}")))?;
        if existing.is_deleted {
            return Ok(existing.clone());
        }

        let tombstone = tombstone_of(existing);
        self.commit(&mut index, vec![tombstone.clone()], &[])?;
        drop(index);

        debug!(note_id = %id, "Deleted note");
        self.notify_change();
        Ok(tombstone)
    }

    /// Tombstone every live note in a domain, returning how many
    pub fn delete_by_domain(&self, domain: &str) -> Result<usize> {
        let domain = normalize_domain(domain)
            .ok_or_else(|| Error::InvalidInput("Domain must not be empty".into()))?;

        let mut index = self.write_index()?;
        let tombstones: Vec<Note> = index
            .values()
            .filter(|note| note.domain == domain && !note.is_deleted)
            .map(tombstone_of)
            .collect();
        let count = tombstones.len();
        if count == 0 {
            return Ok(0);
        }

        self.commit(&mut index, tombstones, &[])?;
        drop(index);

        info!(%domain, count, "Deleted notes for domain");
        self.notify_change();
        Ok(count)
    }

    /// Live note by id
    pub fn get(&self, id: &NoteId) -> Result<Option<Note>> {
        Ok(self
            .read_index()?
            .get(id)
            .filter(|note| !note.is_deleted)
            .cloned())
    }

    /// Any record by id, tombstones included
    pub fn get_record(&self, id: &NoteId) -> Result<Option<Note>> {
        Ok(self.read_index()?.get(id).cloned())
    }

    fn collect_live(&self, filter: impl Fn(&Note) -> bool) -> Result<Vec<Note>> {
        let mut notes: Vec<Note> = self
            .read_index()?
            .values()
            .filter(|note| !note.is_deleted && filter(note))
            .cloned()
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    /// Live notes, newest first
    pub fn list(&self) -> Result<Vec<Note>> {
        self.collect_live(|_| true)
    }

    pub fn list_by_domain(&self, domain: &str) -> Result<Vec<Note>> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(Vec::new());
        };
        self.collect_live(|note| note.domain == domain)
    }

    /// Live notes pinned to `url`, compared after normalization
    pub fn list_by_url(&self, url: &str) -> Result<Vec<Note>> {
        let Some(url) = normalize_page_url(url) else {
            return Ok(Vec::new());
        };
        self.collect_live(|note| note.url.as_deref() == Some(url.as_str()))
    }

    /// Case-insensitive substring search over title, content and tags
    pub fn search(&self, query: &str) -> Result<Vec<Note>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.list();
        }
        self.collect_live(|note| note.matches_query(&needle))
    }

    /// Pending records, tombstones included, oldest first
    pub fn pending_changes(&self, limit: usize) -> Result<Vec<Note>> {
        let mut pending: Vec<Note> = self
            .read_index()?
            .values()
            .filter(|note| note.sync_pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .read_index()?
            .values()
            .filter(|note| note.sync_pending)
            .count())
    }

    /// Versions for a note, newest first
    pub fn get_version_history(&self, id: &NoteId) -> Result<Vec<NoteVersion>> {
        self.versions.list_versions(id)
    }

    /// Editable draft of an earlier version. Save it with
    /// [`ChangeReason::Restore`] to make it current.
    pub fn restore_version(&self, id: &NoteId, version: u64) -> Result<Note> {
        let current = self.get_record(id)?;
        self.versions.restore(id, version, current.as_ref())
    }

    /// Clear `sync_pending` for confirmed notes.
    ///
    /// A note is only confirmed if its `updated_at` still matches the value
    /// that was sent; edits made while the request was in flight stay
    /// pending. Fails with [`Error::Superseded`] once the store has left
    /// `epoch`.
    pub fn mark_synced(
        &self,
        confirmed: &[(NoteId, DateTime<Utc>)],
        at: DateTime<Utc>,
        epoch: u64,
    ) -> Result<usize> {
        let mut index = self.write_index_at(epoch)?;
        let updates: Vec<Note> = confirmed
            .iter()
            .filter_map(|(id, sent_at)| {
                index
                    .get(id)
                    .filter(|note| !note.is_deleted && note.sync_pending)
                    .filter(|note| note.updated_at == *sent_at)
                    .map(|note| {
                        let mut note = note.clone();
                        note.sync_pending = false;
                        note.last_synced_at = Some(at);
                        note
                    })
            })
            .collect();
        let count = updates.len();
        if count > 0 {
            self.commit(&mut index, updates, &[])?;
        }
        Ok(count)
    }

    /// Physically remove tombstones whose deletion the remote confirmed.
    ///
    /// Version history is kept.
    pub fn purge_tombstones(
        &self,
        confirmed: &[(NoteId, DateTime<Utc>)],
        epoch: u64,
    ) -> Result<usize> {
        let mut index = self.write_index_at(epoch)?;
        let removals: Vec<NoteId> = confirmed
            .iter()
            .filter(|(id, deleted_at)| {
                index
                    .get(id)
                    .is_some_and(|note| note.is_deleted && note.updated_at == *deleted_at)
            })
            .map(|(id, _)| *id)
            .collect();
        let count = removals.len();
        if count > 0 {
            self.commit(&mut index, Vec::new(), &removals)?;
        }
        Ok(count)
    }

    /// Apply a decrypted remote copy under last-write-wins.
    ///
    /// Timestamps are taken verbatim. Equal `updated_at` resolves in favor of
    /// the remote copy. Local content that is about to be replaced is
    /// snapshotted first: as `conflict` when it was unsynced, otherwise as
    /// `remote-update`. A record without a usable domain is rejected with
    /// [`Error::InvalidInput`] and changes nothing.
    pub fn apply_remote(
        &self,
        remote: Note,
        at: DateTime<Utc>,
        epoch: u64,
    ) -> Result<ApplyOutcome> {
        if remote.is_deleted {
            let stamp = remote.deleted_at.unwrap_or(remote.updated_at);
            return self.apply_remote_tombstone(&remote.id, stamp, epoch);
        }

        let mut incoming = remote;
        incoming.domain = normalize_domain(&incoming.domain).ok_or_else(|| {
            Error::InvalidInput(format!("Remote note {} has no domain", incoming.id))
        })?;
        incoming.url = incoming.url.as_deref().and_then(normalize_page_url);
        incoming.refresh_hash();
        incoming.sync_pending = false;
        incoming.last_synced_at = Some(at);
        incoming.deleted_at = None;

        let mut index = self.write_index_at(epoch)?;
        let mut history = None;
        let outcome = match index.get(&incoming.id) {
            None => ApplyOutcome::Inserted,
            Some(local) if incoming.updated_at < local.updated_at => {
                debug!(note_id = %incoming.id, "Local copy is newer, keeping it");
                return Ok(ApplyOutcome::Skipped);
            }
            Some(local) => {
                let unsynced = local.sync_pending && local.compute_hash() != incoming.content_hash;
                let reason = if unsynced {
                    ChangeReason::Conflict
                } else {
                    ChangeReason::RemoteUpdate
                };
                history = self
                    .versions
                    .stage_snapshot(local, &incoming.content_hash, reason)?;
                if unsynced {
                    warn!(
                        note_id = %incoming.id,
                        local_updated_at = %local.updated_at,
                        remote_updated_at = %incoming.updated_at,
                        "Remote copy won over unsynced local edits"
                    );
                    ApplyOutcome::Conflict
                } else {
                    ApplyOutcome::Updated
                }
            }
        };

        self.commit_with_history(&mut index, vec![incoming], &[], history)?;
        Ok(outcome)
    }

    /// Apply a remote deletion stamped `deleted_at`.
    ///
    /// A local copy edited after the deletion survives and is pushed later.
    /// Live content is snapshotted before removal: as `conflict` when it had
    /// unsynced edits, otherwise as `remote-delete`.
    pub fn apply_remote_tombstone(
        &self,
        id: &NoteId,
        deleted_at: DateTime<Utc>,
        epoch: u64,
    ) -> Result<ApplyOutcome> {
        let mut index = self.write_index_at(epoch)?;
        let Some(local) = index.get(id) else {
            return Ok(ApplyOutcome::Skipped);
        };
        if local.updated_at > deleted_at {
            debug!(note_id = %id, "Local edit is newer than remote deletion");
            return Ok(ApplyOutcome::Skipped);
        }
        let mut history = None;
        if !local.is_deleted {
            let reason = if local.sync_pending {
                warn!(note_id = %id, "Remote deletion won over unsynced local edits");
                ChangeReason::Conflict
            } else {
                ChangeReason::RemoteDelete
            };
            history = self.versions.stage_snapshot(local, "", reason)?;
        }

        self.commit_with_history(&mut index, Vec::new(), &[*id], history)?;
        debug!(note_id = %id, "Applied remote deletion");
        Ok(ApplyOutcome::Deleted)
    }

    /// Load sync bookkeeping, creating a device id on first use
    pub fn sync_meta(&self) -> Result<SyncMeta> {
        if let Some(raw) = self.backend.get(SYNC_META_KEY)? {
            match serde_json::from_str(&raw) {
                Ok(meta) => return Ok(meta),
                Err(e) => {
                    let error = Error::StorageCorruption {
                        key: SYNC_META_KEY.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(%error, "Resetting unreadable sync metadata");
                }
            }
        }
        let meta = SyncMeta::fresh();
        self.save_sync_meta(&meta)?;
        Ok(meta)
    }

    pub fn save_sync_meta(&self, meta: &SyncMeta) -> Result<()> {
        self.backend
            .set(SYNC_META_KEY, &serde_json::to_string(meta)?)
    }

    /// [`LocalStore::save_sync_meta`], provided the store is still at `epoch`
    pub fn save_sync_meta_at(&self, meta: &SyncMeta, epoch: u64) -> Result<()> {
        let _index = self.write_index_at(epoch)?;
        self.save_sync_meta(meta)
    }

    pub fn save_draft(&self, draft: &EditorDraft) -> Result<()> {
        self.backend
            .set(EDITOR_DRAFT_KEY, &serde_json::to_string(draft)?)
    }

    /// Stored editor draft; an unreadable draft is dropped
    pub fn load_draft(&self) -> Result<Option<EditorDraft>> {
        let Some(raw) = self.backend.get(EDITOR_DRAFT_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable editor draft");
                Ok(None)
            }
        }
    }

    pub fn clear_draft(&self) -> Result<()> {
        self.backend.remove(EDITOR_DRAFT_KEY)
    }

    /// Remove notes, versions, the draft and sync metadata.
    ///
    /// Bumps the store epoch so that in-flight sync results are discarded.
    pub fn clear_all(&self) -> Result<()> {
        let mut index = self.write_index()?;
        let mut keys = self.backend.keys_with_prefix(NOTES_PREFIX)?;
        keys.extend(self.backend.keys_with_prefix(VERSIONS_PREFIX)?);
        keys.push(EDITOR_DRAFT_KEY.to_string());
        keys.push(SYNC_META_KEY.to_string());
        self.backend.set_many(&[], &keys)?;
        index.clear();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        drop(index);

        info!("Cleared local store");
        Ok(())
    }
}

fn tombstone_of(note: &Note) -> Note {
    let mut tombstone = note.clone();
    let stamp = next_stamp(Some(note.updated_at));
    tombstone.is_deleted = true;
    tombstone.deleted_at = Some(stamp);
    tombstone.updated_at = stamp;
    tombstone.sync_pending = true;
    tombstone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use crate::entitlement::{StaticEntitlement, Tier};
    use pretty_assertions::assert_eq;

    fn store_with(backend: Arc<MemoryBackend>) -> LocalStore {
        LocalStore::open(backend, Arc::new(StaticEntitlement(Tier::Free))).unwrap()
    }

    fn store() -> LocalStore {
        store_with(Arc::new(MemoryBackend::new()))
    }

    fn edited(note: &Note, content: &str) -> Note {
        let mut next = note.clone();
        next.content = content.to_string();
        next
    }

    #[test]
    fn save_normalizes_and_marks_pending() {
        let store = store();
        let note = Note::new("Example.COM", "Read #Later")
            .with_url("https://Example.com/page/?ref=x#top")
            .with_tags(["#Tips", " "]);

        let saved = store.save(note).unwrap();
        assert_eq!(saved.domain, "example.com");
        assert_eq!(saved.url.as_deref(), Some("https://example.com/page"));
        assert_eq!(saved.tags, vec!["later", "tips"]);
        assert!(saved.sync_pending);
        assert_eq!(saved.content_hash, saved.compute_hash());
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn save_derives_domain_from_url_when_blank() {
        let store = store();
        let saved = store
            .save(Note::new("", "x").with_url("https://docs.rs/tokio"))
            .unwrap();
        assert_eq!(saved.domain, "docs.rs");

        let err = store.save(Note::new("  ", "x")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn updated_at_strictly_increases() {
        let store = store();
        let first = store.save(Note::new("example.com", "a")).unwrap();
        let mut previous = first.updated_at;
        let mut current = first;
        for i in 0..5 {
            current = store.save(edited(&current, &format!("edit {i}"))).unwrap();
            assert!(current.updated_at > previous);
            previous = current.updated_at;
        }
    }

    #[test]
    fn edits_snapshot_previous_content() {
        let store = store();
        let first = store.save(Note::new("example.com", "first")).unwrap();
        let second = store.save(edited(&first, "second")).unwrap();
        // Same content again: no new version
        store.save(second.clone()).unwrap();

        let history = store.get_version_history(&first.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[0].change_reason, ChangeReason::AutoSave);
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn moving_domains_rewrites_both_partitions() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let note = store.save(Note::new("a.com", "x")).unwrap();
        let mut moved = note.clone();
        moved.domain = "b.com".into();
        store.save(moved).unwrap();

        assert_eq!(backend.get("notes:a.com").unwrap(), None);
        assert!(backend.get("notes:b.com").unwrap().is_some());
        assert!(store.list_by_domain("a.com").unwrap().is_empty());
        assert_eq!(store.list_by_domain("B.com").unwrap().len(), 1);
    }

    #[test]
    fn delete_tombstones_and_hides_note() {
        let store = store();
        let note = store.save(Note::new("example.com", "bye")).unwrap();
        let tombstone = store.delete(&note.id).unwrap();

        assert!(tombstone.is_deleted);
        assert_eq!(tombstone.deleted_at, Some(tombstone.updated_at));
        assert!(tombstone.updated_at > note.updated_at);
        assert!(store.get(&note.id).unwrap().is_none());
        assert!(store.get_record(&note.id).unwrap().is_some());
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.pending_changes(10).unwrap().len(), 1);

        // Deleting again is a no-op
        assert_eq!(store.delete(&note.id).unwrap(), tombstone);
        assert!(matches!(
            store.delete(&NoteId::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn delete_by_domain_only_touches_live_notes_in_domain() {
        let store = store();
        let a1 = store.save(Note::new("a.com", "1")).unwrap();
        store.save(Note::new("a.com", "2")).unwrap();
        store.save(Note::new("b.com", "3")).unwrap();
        store.delete(&a1.id).unwrap();

        assert_eq!(store.delete_by_domain("A.com").unwrap(), 1);
        assert!(store.list_by_domain("a.com").unwrap().is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.delete_by_domain("a.com").unwrap(), 0);
    }

    #[test]
    fn reads_filter_by_url_and_query() {
        let store = store();
        store
            .save(Note::new("example.com", "Rust ownership").with_url("https://example.com/a?x=1"))
            .unwrap();
        store
            .save(Note::new("example.com", "Tokio runtime").with_title("Async"))
            .unwrap();

        assert_eq!(store.list_by_url("https://example.com/a/").unwrap().len(), 1);
        assert_eq!(store.search("OWNERSHIP").unwrap().len(), 1);
        assert_eq!(store.search("async").unwrap().len(), 1);
        assert_eq!(store.search("").unwrap().len(), 2);
        let listed = store.list().unwrap();
        assert!(listed[0].updated_at >= listed[1].updated_at);
    }

    #[test]
    fn pending_changes_oldest_first_with_limit() {
        let store = store();
        let first = store.save(Note::new("example.com", "1")).unwrap();
        store.save(Note::new("example.com", "2")).unwrap();
        store.save(Note::new("example.com", "3")).unwrap();

        let pending = store.pending_changes(2).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
    }

    #[test]
    fn mark_synced_ignores_notes_edited_in_flight() {
        let store = store();
        let a = store.save(Note::new("example.com", "a")).unwrap();
        let b = store.save(Note::new("example.com", "b")).unwrap();
        let sent = vec![(a.id, a.updated_at), (b.id, b.updated_at)];

        store.save(edited(&b, "b2")).unwrap();
        let now = Utc::now();
        assert_eq!(store.mark_synced(&sent, now, store.epoch()).unwrap(), 1);

        let a = store.get(&a.id).unwrap().unwrap();
        assert!(!a.sync_pending);
        assert_eq!(a.last_synced_at, Some(now));
        assert!(store.get(&b.id).unwrap().unwrap().sync_pending);
    }

    #[test]
    fn purge_tombstones_keeps_versions() {
        let store = store();
        let note = store.save(Note::new("example.com", "v1")).unwrap();
        let note = store.save(edited(&note, "v2")).unwrap();
        let tombstone = store.delete(&note.id).unwrap();

        let purged = store
            .purge_tombstones(&[(note.id, tombstone.updated_at)], store.epoch())
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_record(&note.id).unwrap().is_none());
        assert_eq!(store.get_version_history(&note.id).unwrap().len(), 1);
    }

    #[test]
    fn apply_remote_inserts_and_skips_older() {
        let store = store();
        let mut remote = Note::new("example.com", "from elsewhere");
        remote.sync_pending = true;
        let now = Utc::now();

        assert_eq!(
            store.apply_remote(remote.clone(), now, store.epoch()).unwrap(),
            ApplyOutcome::Inserted
        );
        let local = store.get(&remote.id).unwrap().unwrap();
        assert!(!local.sync_pending);
        assert_eq!(local.updated_at, remote.updated_at);
        assert_eq!(store.pending_count().unwrap(), 0);

        let mut older = remote.clone();
        older.content = "stale".into();
        older.updated_at = remote.updated_at - chrono::Duration::seconds(5);
        assert_eq!(store.apply_remote(older, now, store.epoch()).unwrap(), ApplyOutcome::Skipped);
        assert_eq!(store.get(&remote.id).unwrap().unwrap().content, "from elsewhere");
    }

    #[test]
    fn apply_remote_over_pending_edit_records_conflict() {
        let store = store();
        let local = store.save(Note::new("example.com", "local draft")).unwrap();

        let mut remote = local.clone();
        remote.content = "remote wins".into();
        remote.updated_at = local.updated_at + chrono::Duration::seconds(1);

        assert_eq!(
            store.apply_remote(remote, Utc::now(), store.epoch()).unwrap(),
            ApplyOutcome::Conflict
        );
        assert_eq!(store.get(&local.id).unwrap().unwrap().content, "remote wins");
        let history = store.get_version_history(&local.id).unwrap();
        assert_eq!(history[0].change_reason, ChangeReason::Conflict);
        assert_eq!(history[0].content, "local draft");
    }

    #[test]
    fn apply_remote_tie_goes_to_remote_as_update() {
        let store = store();
        let local = store.save(Note::new("example.com", "synced")).unwrap();
        store
            .mark_synced(&[(local.id, local.updated_at)], Utc::now(), store.epoch())
            .unwrap();

        let mut remote = local.clone();
        remote.content = "same instant".into();

        assert_eq!(
            store.apply_remote(remote, Utc::now(), store.epoch()).unwrap(),
            ApplyOutcome::Updated
        );
        let history = store.get_version_history(&local.id).unwrap();
        assert_eq!(history[0].change_reason, ChangeReason::RemoteUpdate);
    }

    #[test]
    fn remote_tombstone_respects_newer_local_edit() {
        let store = store();
        let note = store.save(Note::new("example.com", "keep me")).unwrap();
        store
            .mark_synced(&[(note.id, note.updated_at)], Utc::now(), store.epoch())
            .unwrap();
        let before = note.updated_at - chrono::Duration::seconds(1);

        assert_eq!(
            store
                .apply_remote_tombstone(&note.id, before, store.epoch())
                .unwrap(),
            ApplyOutcome::Skipped
        );
        assert!(store.get(&note.id).unwrap().is_some());

        let after = note.updated_at + chrono::Duration::seconds(1);
        assert_eq!(
            store.apply_remote_tombstone(&note.id, after, store.epoch()).unwrap(),
            ApplyOutcome::Deleted
        );
        assert!(store.get_record(&note.id).unwrap().is_none());
        let history = store.get_version_history(&note.id).unwrap();
        assert_eq!(history[0].change_reason, ChangeReason::RemoteDelete);

        assert_eq!(
            store.apply_remote_tombstone(&NoteId::new(), after, store.epoch()).unwrap(),
            ApplyOutcome::Skipped
        );
    }

    #[test]
    fn remote_tombstone_over_pending_edit_records_conflict() {
        let store = store();
        let note = store.save(Note::new("example.com", "unsent edit")).unwrap();
        let after = note.updated_at + chrono::Duration::seconds(1);

        assert_eq!(
            store.apply_remote_tombstone(&note.id, after, store.epoch()).unwrap(),
            ApplyOutcome::Deleted
        );
        let history = store.get_version_history(&note.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_reason, ChangeReason::Conflict);
        assert_eq!(history[0].content, "unsent edit");
    }

    #[test]
    fn apply_remote_rejects_blank_domain_without_writing() {
        let store = store();
        let mut remote = Note::new("example.com", "nowhere");
        remote.domain = "   ".into();

        let err = store
            .apply_remote(remote.clone(), Utc::now(), store.epoch())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.get_record(&remote.id).unwrap().is_none());
    }

    #[test]
    fn writes_from_an_older_epoch_are_dropped() {
        let store = store();
        let note = store.save(Note::new("example.com", "pending")).unwrap();
        let epoch = store.epoch();
        store.clear_all().unwrap();

        let remote = Note::new("example.com", "arrived late");
        assert!(matches!(
            store.apply_remote(remote, Utc::now(), epoch),
            Err(Error::Superseded)
        ));
        assert!(matches!(
            store.apply_remote_tombstone(&note.id, Utc::now(), epoch),
            Err(Error::Superseded)
        ));
        assert!(matches!(
            store.mark_synced(&[(note.id, note.updated_at)], Utc::now(), epoch),
            Err(Error::Superseded)
        ));
        assert!(matches!(
            store.save_sync_meta_at(&SyncMeta::fresh(), epoch),
            Err(Error::Superseded)
        ));
        assert!(store.list().unwrap().is_empty());

        let bumped = store.bump_epoch().unwrap();
        assert_eq!(bumped, store.epoch());
        assert!(matches!(
            store.purge_tombstones(&[], bumped - 1),
            Err(Error::Superseded)
        ));
    }

    #[test]
    fn load_skips_corrupt_partitions_and_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let good = Note::new("good.com", "fine");
        let raw = serde_json::to_string(&vec![
            serde_json::to_value(&good).unwrap(),
            serde_json::json!({"id": "nope"}),
        ])
        .unwrap();
        backend.set("notes:good.com", &raw).unwrap();
        backend.set("notes:bad.com", "[{broken").unwrap();

        let store = store_with(backend);
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(store.skipped_on_load(), 2);
    }

    #[test]
    fn failed_write_leaves_index_untouched() {
        let backend = Arc::new(MemoryBackend::with_quota(1_200));
        let store = store_with(backend);
        let note = store.save(Note::new("example.com", "small")).unwrap();

        let err = store.save(edited(&note, &"x".repeat(4_000))).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        assert_eq!(store.get(&note.id).unwrap().unwrap().content, "small");
    }

    #[test]
    fn failed_write_keeps_full_history() {
        let backend = Arc::new(MemoryBackend::with_quota(6_000));
        let store = store_with(backend);
        let mut note = store.save(Note::new("example.com", "v0")).unwrap();
        for i in 1..=5 {
            note = store.save(edited(&note, &format!("v{i}"))).unwrap();
        }
        let contents = |store: &LocalStore| -> Vec<String> {
            store
                .get_version_history(&note.id)
                .unwrap()
                .into_iter()
                .map(|version| version.content)
                .collect()
        };
        let before = contents(&store);
        assert_eq!(before, vec!["v4", "v3", "v2", "v1", "v0"]);

        let err = store.save(edited(&note, &"x".repeat(5_000))).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));
        assert_eq!(contents(&store), before);
        assert_eq!(store.get(&note.id).unwrap().unwrap().content, "v5");
    }

    #[test]
    fn drafts_and_sync_meta_persist() {
        let store = store();
        assert!(store.load_draft().unwrap().is_none());
        let draft = EditorDraft::new("example.com", "half-written");
        store.save_draft(&draft).unwrap();
        assert_eq!(store.load_draft().unwrap(), Some(draft));
        store.clear_draft().unwrap();
        assert!(store.load_draft().unwrap().is_none());

        let meta = store.sync_meta().unwrap();
        assert_eq!(store.sync_meta().unwrap().device_id, meta.device_id);
    }

    #[test]
    fn clear_all_wipes_everything_and_bumps_epoch() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let note = store.save(Note::new("example.com", "a")).unwrap();
        store.save(edited(&note, "b")).unwrap();
        store.save_draft(&EditorDraft::new("example.com", "x")).unwrap();
        let epoch = store.epoch();

        store.clear_all().unwrap();
        assert_eq!(store.epoch(), epoch + 1);
        assert!(store.list().unwrap().is_empty());
        assert_eq!(backend.used_bytes().unwrap(), 0);
    }
}
