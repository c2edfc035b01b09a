//! Reference server-side reconciliation.
//!
//! Holds one account's encrypted records and applies last-write-wins on
//! `updatedAt`. Used by [`super::InMemoryRemoteStore`] and the API server.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ReconcileRequest, ReconcileResponse};
use crate::crypto::EncryptedNote;
use crate::models::NoteId;

const RESPONSE_CACHE_LIMIT: usize = 256;

#[derive(Debug, Clone)]
struct StoredRecord {
    note: EncryptedNote,
    stored_at: DateTime<Utc>,
}

/// One account's remote state
#[derive(Debug, Default)]
pub struct ReconciliationLedger {
    records: HashMap<NoteId, StoredRecord>,
    responses: HashMap<String, ReconcileResponse>,
    response_order: VecDeque<String>,
    last_stamp: Option<DateTime<Utc>>,
}

impl ReconciliationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored copy of a note, tombstones included
    pub fn get(&self, id: &NoteId) -> Option<&EncryptedNote> {
        self.records.get(id).map(|record| &record.note)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Strictly increasing server clock
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    /// Apply a batch and compute the reply.
    ///
    /// A repeated non-empty batch id returns the first reply unchanged.
    pub fn reconcile(&mut self, request: &ReconcileRequest) -> ReconcileResponse {
        if !request.is_empty() {
            if let Some(cached) = self.responses.get(&request.device_batch_id) {
                debug!(batch_id = %request.device_batch_id, "Replaying cached reconcile response");
                return cached.clone();
            }
        }

        let stamp = self.next_stamp();
        let mut accepted = Vec::new();
        let mut conflicts = Vec::new();
        let mut mentioned = HashSet::new();

        for note in &request.notes {
            mentioned.insert(note.id);
            match self.records.get(&note.id) {
                Some(stored) if note.updated_at < stored.note.updated_at => {
                    conflicts.push(stored.note.clone());
                }
                _ => {
                    self.records.insert(
                        note.id,
                        StoredRecord {
                            note: note.clone(),
                            stored_at: stamp,
                        },
                    );
                    accepted.push(note.id);
                }
            }
        }

        for tombstone in &request.deletions {
            mentioned.insert(tombstone.id);
            match self.records.get_mut(&tombstone.id) {
                None => accepted.push(tombstone.id),
                Some(stored) if tombstone.deleted_at < stored.note.updated_at => {
                    conflicts.push(stored.note.clone());
                }
                Some(stored) => {
                    // Ciphertext stays; it is opaque and the flag is what peers act on.
                    stored.note.is_deleted = true;
                    stored.note.deleted_at = Some(tombstone.deleted_at);
                    stored.note.updated_at = tombstone.deleted_at;
                    stored.stored_at = stamp;
                    accepted.push(tombstone.id);
                }
            }
        }

        let mut missing_notes: Vec<EncryptedNote> = self
            .records
            .values()
            .filter(|record| !mentioned.contains(&record.note.id))
            .filter(|record| request.since.map_or(true, |since| record.stored_at > since))
            .map(|record| record.note.clone())
            .collect();
        missing_notes.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));

        let response = ReconcileResponse {
            accepted,
            missing_notes,
            conflicts,
            server_time: stamp,
        };

        if !request.is_empty() {
            self.remember(request.device_batch_id.clone(), response.clone());
        }
        response
    }

    fn remember(&mut self, batch_id: String, response: ReconcileResponse) {
        if self.responses.insert(batch_id.clone(), response).is_none() {
            self.response_order.push_back(batch_id);
        }
        while self.response_order.len() > RESPONSE_CACHE_LIMIT {
            if let Some(oldest) = self.response_order.pop_front() {
                self.responses.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptedField;
    use crate::remote::Tombstone;
    use pretty_assertions::assert_eq;

    fn field() -> EncryptedField {
        EncryptedField {
            ciphertext: "AA==".into(),
            nonce: "AA==".into(),
            tag: "AA==".into(),
        }
    }

    fn encrypted(id: NoteId, updated_at: DateTime<Utc>) -> EncryptedNote {
        EncryptedNote {
            id,
            domain: "example.com".into(),
            url: None,
            title_encrypted: field(),
            content_encrypted: field(),
            tags_encrypted: field(),
            created_at: updated_at,
            updated_at,
            is_deleted: false,
            deleted_at: None,
        }
    }

    fn request(batch: &str, since: Option<DateTime<Utc>>, notes: Vec<EncryptedNote>) -> ReconcileRequest {
        ReconcileRequest {
            device_batch_id: batch.into(),
            since,
            notes,
            deletions: Vec::new(),
        }
    }

    #[test]
    fn newer_or_equal_wins_older_conflicts() {
        let mut ledger = ReconciliationLedger::new();
        let id = NoteId::new();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(1);

        let first = ledger.reconcile(&request("a", None, vec![encrypted(id, t2)]));
        assert_eq!(first.accepted, vec![id]);

        let stale = ledger.reconcile(&request("b", None, vec![encrypted(id, t1)]));
        assert!(stale.accepted.is_empty());
        assert_eq!(stale.conflicts.len(), 1);
        assert_eq!(stale.conflicts[0].updated_at, t2);

        let tie = ledger.reconcile(&request("c", None, vec![encrypted(id, t2)]));
        assert_eq!(tie.accepted, vec![id]);
    }

    #[test]
    fn replayed_batch_returns_same_reply() {
        let mut ledger = ReconciliationLedger::new();
        let batch = request("same", None, vec![encrypted(NoteId::new(), Utc::now())]);
        let first = ledger.reconcile(&batch);
        let second = ledger.reconcile(&batch);
        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn since_cursor_limits_missing_notes() {
        let mut ledger = ReconciliationLedger::new();
        let early = ledger.reconcile(&request("one", None, vec![encrypted(NoteId::new(), Utc::now())]));
        ledger.reconcile(&request("two", None, vec![encrypted(NoteId::new(), Utc::now())]));

        let pull = ledger.reconcile(&request("pull", Some(early.server_time), Vec::new()));
        assert_eq!(pull.missing_notes.len(), 1);

        let full = ledger.reconcile(&request("pull", None, Vec::new()));
        assert_eq!(full.missing_notes.len(), 2);
        assert!(full.server_time > pull.server_time);
    }

    #[test]
    fn tombstones_apply_lww_and_keep_records() {
        let mut ledger = ReconciliationLedger::new();
        let id = NoteId::new();
        let t1 = Utc::now();
        ledger.reconcile(&request("put", None, vec![encrypted(id, t1)]));

        let stale = ledger.reconcile(&ReconcileRequest {
            device_batch_id: "del-old".into(),
            since: None,
            notes: Vec::new(),
            deletions: vec![Tombstone {
                id,
                deleted_at: t1 - chrono::Duration::seconds(1),
            }],
        });
        assert_eq!(stale.conflicts.len(), 1);
        assert!(!ledger.get(&id).unwrap().is_deleted);

        let t2 = t1 + chrono::Duration::seconds(1);
        let unknown = NoteId::new();
        let applied = ledger.reconcile(&ReconcileRequest {
            device_batch_id: "del".into(),
            since: None,
            notes: Vec::new(),
            deletions: vec![
                Tombstone { id, deleted_at: t2 },
                Tombstone {
                    id: unknown,
                    deleted_at: t2,
                },
            ],
        });
        assert_eq!(applied.accepted, vec![id, unknown]);
        let stored = ledger.get(&id).unwrap();
        assert!(stored.is_deleted);
        assert_eq!(stored.updated_at, t2);
        assert!(ledger.get(&unknown).is_none());
    }
}
