//! Multi-device sync scenarios against the in-memory remote store

mod common;

use std::time::Duration;

use common::{account_key, device, test_config, tick, Device, SlowRemote};
use marginalia_core::crypto::encrypt_fields;
use marginalia_core::remote::{InMemoryRemoteStore, ReconcileRequest, RemoteStore};
use marginalia_core::sync::SkipReason;
use marginalia_core::{ChangeReason, Note, SyncOutcome, SyncState, Tier};
use pretty_assertions::assert_eq;

#[tokio::test(flavor = "multi_thread")]
async fn note_created_on_one_device_reaches_another() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    let note = laptop
        .store
        .save(Note::new("news.ycombinator.com", "Interesting thread").with_title("HN"))
        .unwrap();
    laptop.sync().await;

    let report = phone.sync().await;
    assert_eq!(report.inserted, 1);
    let copy = phone.store.get(&note.id).unwrap().unwrap();
    assert_eq!(copy.title, "HN");
    assert_eq!(copy.content, "Interesting thread");
    assert_eq!(copy.content_hash, note.content_hash);
    assert!(!copy.sync_pending);

    let stored = remote.stored(&note.id).unwrap();
    let wire = serde_json::to_string(&stored).unwrap();
    assert!(!wire.contains("Interesting thread"));
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_response_is_resent_with_the_same_batch_id() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let note = laptop.store.save(Note::new("example.com", "once")).unwrap();

    remote.drop_next_responses(1);
    let failed = laptop.engine.sync_now().await;
    assert!(matches!(failed, SyncOutcome::Failed { auth: false, .. }));
    assert!(laptop.store.get(&note.id).unwrap().unwrap().sync_pending);
    assert_eq!(remote.stored_count(), 1);

    let report = laptop.sync().await;
    assert_eq!(report.accepted, 1);
    assert_eq!(remote.stored_count(), 1);
    assert_eq!(remote.request_count(), 2);
    assert_eq!(laptop.store.pending_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn later_edit_wins_and_loser_is_recoverable() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    let note = laptop.store.save(Note::new("example.com", "draft")).unwrap();
    laptop.sync().await;
    phone.sync().await;

    laptop.edit(&note, "laptop edit");
    tick().await;
    let phone_copy = phone.store.get(&note.id).unwrap().unwrap();
    phone.edit(&phone_copy, "phone edit");

    // The later edit reaches the server first; the earlier one is rejected.
    phone.sync().await;
    let report = laptop.sync().await;
    assert_eq!(report.accepted, 0);
    assert_eq!(report.conflicts, 1);

    assert_eq!(laptop.content_of(&note).as_deref(), Some("phone edit"));
    assert_eq!(laptop.store.pending_count().unwrap(), 0);

    let history = laptop.store.get_version_history(&note.id).unwrap();
    assert_eq!(history[0].change_reason, ChangeReason::Conflict);
    assert_eq!(history[0].content, "laptop edit");

    let draft = laptop
        .store
        .restore_version(&note.id, history[0].version)
        .unwrap();
    let restored = laptop
        .store
        .save_with_reason(draft, ChangeReason::Restore)
        .unwrap();
    assert_eq!(restored.content, "laptop edit");
    laptop.sync().await;
    phone.sync().await;
    assert_eq!(phone.content_of(&note).as_deref(), Some("laptop edit"));
}

#[tokio::test(flavor = "multi_thread")]
async fn synced_copy_is_replaced_by_newer_remote_edit() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    let note = laptop.store.save(Note::new("example.com", "v1")).unwrap();
    laptop.sync().await;
    phone.sync().await;

    let phone_copy = phone.store.get(&note.id).unwrap().unwrap();
    phone.edit(&phone_copy, "v2 from phone");
    phone.sync().await;

    let report = laptop.sync().await;
    assert_eq!(report.updated, 1);
    assert_eq!(laptop.content_of(&note).as_deref(), Some("v2 from phone"));
    let history = laptop.store.get_version_history(&note.id).unwrap();
    assert_eq!(history[0].change_reason, ChangeReason::RemoteUpdate);
    assert_eq!(history[0].content, "v1");
}

#[tokio::test(flavor = "multi_thread")]
async fn free_tier_keeps_exactly_five_versions() {
    let remote = InMemoryRemoteStore::new();
    let laptop = Device::new(remote, Tier::Free);
    let mut note = laptop.store.save(Note::new("example.com", "v0")).unwrap();
    for i in 1..=8 {
        note = laptop.edit(&note, &format!("v{i}"));
    }

    let history = laptop.store.get_version_history(&note.id).unwrap();
    let versions: Vec<u64> = history.iter().map(|v| v.version).collect();
    assert_eq!(versions, vec![8, 7, 6, 5, 4]);
    assert_eq!(history[0].content, "v7");
    assert_eq!(history[4].content, "v3");
}

#[tokio::test(flavor = "multi_thread")]
async fn premium_tier_keeps_all_versions() {
    let remote = InMemoryRemoteStore::new();
    let laptop = Device::new(remote, Tier::Premium);
    let mut note = laptop.store.save(Note::new("example.com", "v0")).unwrap();
    for i in 1..=8 {
        note = laptop.edit(&note, &format!("v{i}"));
    }
    assert_eq!(laptop.store.get_version_history(&note.id).unwrap().len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_edits_sync_once_connectivity_returns() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    remote.set_offline(true);
    let note = laptop.store.save(Note::new("example.com", "one")).unwrap();
    let note = laptop.edit(&note, "two");
    let note = laptop.edit(&note, "three");

    assert!(matches!(
        laptop.engine.sync_now().await,
        SyncOutcome::Failed { .. }
    ));
    assert_eq!(laptop.engine.status().state, SyncState::Failed);
    assert_eq!(laptop.store.get(&note.id).unwrap().unwrap().content, "three");
    assert_eq!(laptop.store.pending_count().unwrap(), 1);

    remote.set_offline(false);
    laptop.sync().await;
    assert_eq!(laptop.engine.status().state, SyncState::Idle);
    assert_eq!(laptop.store.pending_count().unwrap(), 0);

    phone.sync().await;
    assert_eq!(phone.content_of(&note).as_deref(), Some("three"));
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_after_delete_resurrects_the_note() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    let note = laptop.store.save(Note::new("example.com", "contested")).unwrap();
    laptop.sync().await;
    phone.sync().await;

    laptop.store.delete(&note.id).unwrap();
    tick().await;
    let phone_copy = phone.store.get(&note.id).unwrap().unwrap();
    phone.edit(&phone_copy, "still needed");

    laptop.sync().await;
    assert!(laptop.store.get_record(&note.id).unwrap().is_none());

    phone.sync().await;
    assert!(!remote.stored(&note.id).unwrap().is_deleted);

    laptop.sync().await;
    assert_eq!(laptop.content_of(&note).as_deref(), Some("still needed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_after_edit_removes_the_note_everywhere() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let phone = device(&remote, account_key(1));

    let note = laptop.store.save(Note::new("example.com", "soon gone")).unwrap();
    laptop.sync().await;
    phone.sync().await;

    let phone_copy = phone.store.get(&note.id).unwrap().unwrap();
    phone.edit(&phone_copy, "edited first");
    phone.sync().await;
    tick().await;

    // Laptop has not pulled the edit yet and deletes its copy.
    laptop.store.delete(&note.id).unwrap();
    let report = laptop.sync().await;
    assert_eq!(report.deletions_pushed, 1);
    assert!(laptop.store.get_record(&note.id).unwrap().is_none());
    assert!(remote.stored(&note.id).unwrap().is_deleted);

    let report = phone.sync().await;
    assert_eq!(report.remote_deletions, 1);
    assert!(phone.store.get_record(&note.id).unwrap().is_none());
    let history = phone.store.get_version_history(&note.id).unwrap();
    assert_eq!(history[0].change_reason, ChangeReason::RemoteDelete);
    assert_eq!(history[0].content, "edited first");
}

#[tokio::test(flavor = "multi_thread")]
async fn wrong_key_reports_undecryptable_notes_without_losing_them() {
    let remote = InMemoryRemoteStore::new();
    let laptop = device(&remote, account_key(1));
    let intruder = device(&remote, account_key(2));

    let note = laptop.store.save(Note::new("example.com", "secret")).unwrap();
    laptop.sync().await;

    let report = intruder.sync().await;
    assert_eq!(report.undecryptable, vec![note.id]);
    assert!(intruder.store.get(&note.id).unwrap().is_none());
    assert_eq!(intruder.engine.status().undecryptable, vec![note.id]);

    // The cursor did not advance, so the note is offered again.
    let again = intruder.sync().await;
    assert_eq!(again.undecryptable, vec![note.id]);
    assert!(remote.stored(&note.id).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_remote_note_does_not_block_the_rest() {
    let remote = InMemoryRemoteStore::new();
    let mut broken = encrypt_fields(&Note::new("example.com", "no home"), &account_key(1)).unwrap();
    broken.domain = String::new();
    remote
        .reconcile(&ReconcileRequest {
            device_batch_id: "legacy-client".into(),
            since: None,
            notes: vec![broken.clone()],
            deletions: Vec::new(),
        })
        .await
        .unwrap();

    let laptop = device(&remote, account_key(1));
    let good = laptop.store.save(Note::new("example.com", "fine")).unwrap();
    laptop.sync().await;

    let phone = device(&remote, account_key(1));
    let report = phone.sync().await;
    assert_eq!(report.inserted, 1);
    assert_eq!(report.malformed, vec![broken.id]);
    assert_eq!(phone.content_of(&good).as_deref(), Some("fine"));
    assert!(phone.store.get_record(&broken.id).unwrap().is_none());

    // The cursor did not advance, so a later note still arrives.
    tick().await;
    let later = laptop.store.save(Note::new("example.com", "later")).unwrap();
    laptop.sync().await;
    let again = phone.sync().await;
    assert_eq!(again.malformed, vec![broken.id]);
    assert_eq!(phone.content_of(&later).as_deref(), Some("later"));
}

#[tokio::test(flavor = "multi_thread")]
async fn devices_sharing_a_passphrase_derive_the_same_key() {
    let remote = InMemoryRemoteStore::new();
    let config = marginalia_core::EngineConfig::default();
    let laptop = Device::with_config(remote.clone(), Tier::Free, config.clone());
    let phone = Device::with_config(remote.clone(), Tier::Free, config);
    laptop
        .engine
        .sign_in_with_secret("correct horse battery staple")
        .await
        .unwrap();
    phone
        .engine
        .sign_in_with_secret("correct horse battery staple")
        .await
        .unwrap();

    let note = laptop.store.save(Note::new("example.com", "shared")).unwrap();
    laptop.sync().await;
    let report = phone.sync().await;
    assert!(report.undecryptable.is_empty());
    assert_eq!(phone.content_of(&note).as_deref(), Some("shared"));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_sync_calls_share_one_request() {
    let inner = InMemoryRemoteStore::new();
    let remote = SlowRemote {
        inner: inner.clone(),
        delay: Duration::from_millis(200),
    };
    let laptop = Device::new(remote, Tier::Free).signed_in(account_key(1));
    laptop.store.save(Note::new("example.com", "x")).unwrap();

    let (first, second) = tokio::join!(laptop.engine.sync_now(), laptop.engine.sync_now());
    assert!(first.is_completed());
    assert_eq!(first, second);
    assert_eq!(inner.request_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn sign_out_during_flight_discards_the_result() {
    let inner = InMemoryRemoteStore::new();
    let remote = SlowRemote {
        inner: inner.clone(),
        delay: Duration::from_millis(200),
    };
    let laptop = Device::new(remote, Tier::Free).signed_in(account_key(1));
    let note = laptop.store.save(Note::new("example.com", "x")).unwrap();

    let engine = laptop.engine.clone();
    let in_flight = tokio::spawn(async move { engine.sync_now().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    laptop.engine.sign_out();

    let outcome = in_flight.await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::AccountChanged));
    assert!(laptop.store.get(&note.id).unwrap().unwrap().sync_pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_all_during_flight_discards_the_result() {
    let inner = InMemoryRemoteStore::new();
    let remote = SlowRemote {
        inner: inner.clone(),
        delay: Duration::from_millis(200),
    };
    let laptop = Device::new(remote, Tier::Free).signed_in(account_key(1));
    let other = device(&inner, account_key(1));
    other.store.save(Note::new("example.com", "from elsewhere")).unwrap();
    other.sync().await;

    let engine = laptop.engine.clone();
    let in_flight = tokio::spawn(async move { engine.sync_now().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    laptop.store.clear_all().unwrap();

    let outcome = in_flight.await.unwrap();
    assert_eq!(outcome, SyncOutcome::Skipped(SkipReason::AccountChanged));
    assert!(laptop.store.list().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn background_loop_picks_up_local_changes() {
    let remote = InMemoryRemoteStore::new();
    let config = marginalia_core::EngineConfig {
        change_debounce: Duration::from_millis(50),
        ..test_config()
    };
    let laptop = Device::with_config(remote.clone(), Tier::Free, config).signed_in(account_key(1));
    let mut status = laptop.engine.subscribe();
    let handle = laptop.engine.clone().spawn();

    // Initial sync on start
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|status| status.last_synced_at.is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    let note = laptop.store.save(Note::new("example.com", "later")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while remote.stored(&note.id).is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    handle.shutdown().await;
}
