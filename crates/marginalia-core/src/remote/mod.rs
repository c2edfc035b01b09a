//! Remote store contract and wire types.
//!
//! The remote store only ever sees [`EncryptedNote`]s; reconciliation is
//! idempotent by `deviceBatchId` and per-note id.

mod http;
mod ledger;
mod memory;

pub use http::HttpRemoteStore;
pub use ledger::ReconciliationLedger;
pub use memory::InMemoryRemoteStore;

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{EncryptedNote, Salt};
use crate::entitlement::Tier;
use crate::error::Result;
use crate::models::NoteId;

/// A deletion sent to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: NoteId,
    pub deleted_at: DateTime<Utc>,
}

/// Body of `POST /v1/sync/reconcile`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub device_batch_id: String,
    /// Server time of the last applied pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<EncryptedNote>,
    #[serde(default)]
    pub deletions: Vec<Tombstone>,
}

impl ReconcileRequest {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.deletions.is_empty()
    }
}

/// Reply to a reconciliation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    /// Batch ids the server stored or already held in this exact form
    #[serde(default)]
    pub accepted: Vec<NoteId>,
    /// Records stored after `since` that the batch did not mention
    #[serde(default)]
    pub missing_notes: Vec<EncryptedNote>,
    /// Newer server copies of batch ids that were rejected
    #[serde(default)]
    pub conflicts: Vec<EncryptedNote>,
    pub server_time: DateTime<Utc>,
}

/// Body of `GET /v1/account/salt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltResponse {
    /// Base64 KDF salt
    pub salt: String,
}

/// Remote persistence for encrypted notes
pub trait RemoteStore: Send + Sync + 'static {
    /// Push a batch and pull records missing locally
    fn reconcile(
        &self,
        request: &ReconcileRequest,
    ) -> impl Future<Output = Result<ReconcileResponse>> + Send;

    /// The account's KDF salt, created by the server on first request
    fn account_salt(&self) -> impl Future<Output = Result<Salt>> + Send;

    /// The account's current tier
    fn entitlement(&self) -> impl Future<Output = Result<Tier>> + Send;
}
