//! Outgoing reconciliation batches

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::crypto::{encrypt_fields, EncryptedNote, EncryptionKey};
use crate::error::Result;
use crate::models::{Note, NoteId};
use crate::remote::{ReconcileRequest, Tombstone};

/// Encrypted pending records plus what was sent, for confirmation
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub device_batch_id: String,
    pub notes: Vec<EncryptedNote>,
    pub deletions: Vec<Tombstone>,
    /// `(id, updated_at)` of every live note in the batch
    pub sent_notes: Vec<(NoteId, DateTime<Utc>)>,
    /// `(id, deleted_at)` of every tombstone in the batch
    pub sent_deletions: Vec<(NoteId, DateTime<Utc>)>,
}

impl SyncBatch {
    /// Encrypt pending records. Tombstones travel as bare deletions.
    pub fn collect(device_id: &str, pending: &[Note], key: &EncryptionKey) -> Result<Self> {
        let mut notes = Vec::new();
        let mut deletions = Vec::new();
        let mut sent_notes = Vec::new();
        let mut sent_deletions = Vec::new();

        for note in pending {
            if note.is_deleted {
                let deleted_at = note.updated_at;
                deletions.push(Tombstone {
                    id: note.id,
                    deleted_at,
                });
                sent_deletions.push((note.id, deleted_at));
            } else {
                notes.push(encrypt_fields(note, key)?);
                sent_notes.push((note.id, note.updated_at));
            }
        }

        let pairs: Vec<(NoteId, DateTime<Utc>)> = sent_notes
            .iter()
            .chain(sent_deletions.iter())
            .copied()
            .collect();

        Ok(Self {
            device_batch_id: batch_id(device_id, &pairs),
            notes,
            deletions,
            sent_notes,
            sent_deletions,
        })
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_request(&self, since: Option<DateTime<Utc>>) -> ReconcileRequest {
        ReconcileRequest {
            device_batch_id: self.device_batch_id.clone(),
            since,
            notes: self.notes.clone(),
            deletions: self.deletions.clone(),
        }
    }
}

/// SHA-256 over the device id and the sorted `(id, updated_at)` pairs.
///
/// Resending the same records yields the same id; any re-edit changes it.
pub fn batch_id(device_id: &str, pairs: &[(NoteId, DateTime<Utc>)]) -> String {
    let mut lines: Vec<String> = pairs
        .iter()
        .map(|(id, updated_at)| format!("{id}:{}", updated_at.timestamp_nanos_opt().unwrap_or(i64::MAX)))
        .collect();
    lines.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    for line in lines {
        hasher.update(b"\n");
        hasher.update(line.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EncryptionKey;

    #[test]
    fn batch_id_ignores_order_but_not_timestamps() {
        let a = NoteId::new();
        let b = NoteId::new();
        let t = Utc::now();
        let later = t + chrono::Duration::milliseconds(1);

        assert_eq!(
            batch_id("dev", &[(a, t), (b, t)]),
            batch_id("dev", &[(b, t), (a, t)])
        );
        assert_ne!(batch_id("dev", &[(a, t)]), batch_id("dev", &[(a, later)]));
        assert_ne!(batch_id("dev", &[(a, t)]), batch_id("other", &[(a, t)]));
    }

    #[test]
    fn collect_splits_live_notes_and_tombstones() {
        let key = EncryptionKey::from_bytes([1u8; 32]);
        let live = Note::new("example.com", "live");
        let mut gone = Note::new("example.com", "gone");
        gone.is_deleted = true;
        gone.deleted_at = Some(gone.updated_at);

        let batch = SyncBatch::collect("dev", &[live.clone(), gone.clone()], &key).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.notes[0].id, live.id);
        assert_eq!(batch.deletions[0].id, gone.id);
        assert_eq!(batch.sent_deletions, vec![(gone.id, gone.updated_at)]);

        let again = SyncBatch::collect("dev", &[gone, live], &key).unwrap();
        assert_eq!(again.device_batch_id, batch.device_batch_id);
    }
}
