//! Local state survives a restart on the SQLite backend

use std::sync::Arc;

use marginalia_core::db::SqliteBackend;
use marginalia_core::{
    ChangeReason, EditorDraft, EntitlementGate, LocalStore, Note, StaticEntitlement, Tier,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn open(path: &std::path::Path) -> LocalStore {
    let entitlement: Arc<dyn EntitlementGate> = Arc::new(StaticEntitlement(Tier::Free));
    let backend = Arc::new(SqliteBackend::open(path).unwrap());
    LocalStore::open(backend, entitlement).unwrap()
}

#[test]
fn notes_versions_and_tombstones_survive_restart() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("marginalia.db");

    let (kept, deleted, draft, device_id) = {
        let store = open(&path);
        let kept = store
            .save(
                Note::new("docs.rs", "tokio::select! notes #async")
                    .with_url("https://docs.rs/tokio/latest/tokio/macro.select.html"),
            )
            .unwrap();
        let mut edited = kept.clone();
        edited.content = "tokio::select! polls branches randomly #async".into();
        let kept = store.save(edited).unwrap();

        let deleted = store.save(Note::new("example.com", "temporary")).unwrap();
        store.delete(&deleted.id).unwrap();

        let draft = EditorDraft::new("docs.rs", "unfinished thought");
        store.save_draft(&draft).unwrap();
        let device_id = store.sync_meta().unwrap().device_id;
        (kept, deleted, draft, device_id)
    };

    let store = open(&path);
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.len(), 2);

    let reloaded = store.get(&kept.id).unwrap().unwrap();
    assert_eq!(reloaded, kept);
    assert!(reloaded.sync_pending);
    assert_eq!(reloaded.tags, vec!["async"]);

    let tombstone = store.get_record(&deleted.id).unwrap().unwrap();
    assert!(tombstone.is_deleted);
    assert!(store.get(&deleted.id).unwrap().is_none());
    assert_eq!(store.pending_count().unwrap(), 2);

    let history = store.get_version_history(&kept.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_reason, ChangeReason::AutoSave);
    assert_eq!(history[0].content, "tokio::select! notes #async");

    assert_eq!(store.load_draft().unwrap(), Some(draft));
    assert_eq!(store.sync_meta().unwrap().device_id, device_id);
    assert_eq!(
        store
            .list_by_url("https://docs.rs/tokio/latest/tokio/macro.select.html?search=x")
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn restore_after_restart_creates_restore_version() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("marginalia.db");

    let note_id = {
        let store = open(&path);
        let note = store.save(Note::new("example.com", "first")).unwrap();
        let mut next = note.clone();
        next.content = "second".into();
        store.save(next).unwrap();
        note.id
    };

    let store = open(&path);
    let draft = store.restore_version(&note_id, 1).unwrap();
    assert_eq!(draft.content, "first");
    assert_eq!(store.get(&note_id).unwrap().unwrap().content, "second");

    let restored = store.save_with_reason(draft, ChangeReason::Restore).unwrap();
    assert_eq!(restored.content, "first");

    let history = store.get_version_history(&note_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].change_reason, ChangeReason::Restore);
    assert_eq!(history[0].content, "second");
}
