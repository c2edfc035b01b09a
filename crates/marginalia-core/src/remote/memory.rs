//! In-process remote store with failure injection

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{ReconcileRequest, ReconcileResponse, ReconciliationLedger, RemoteStore};
use crate::crypto::{EncryptedNote, Salt};
use crate::entitlement::Tier;
use crate::error::{Error, Result};
use crate::models::NoteId;

#[derive(Debug, Default)]
struct Inner {
    ledger: Mutex<ReconciliationLedger>,
    salt: Mutex<Option<Salt>>,
    tier: Mutex<Tier>,
    offline: AtomicBool,
    reject_auth: AtomicBool,
    drop_responses: AtomicUsize,
    requests: AtomicUsize,
}

/// Remote store backed by a [`ReconciliationLedger`] in memory.
///
/// Clones share state, so several engines can act as devices of one
/// account.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemoteStore {
    inner: Arc<Inner>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a network error
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail every call with an auth error
    pub fn set_reject_auth(&self, reject: bool) {
        self.inner.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Process the next `count` reconcile calls but lose their replies
    pub fn drop_next_responses(&self, count: usize) {
        self.inner.drop_responses.store(count, Ordering::SeqCst);
    }

    pub fn set_tier(&self, tier: Tier) {
        if let Ok(mut guard) = self.inner.tier.lock() {
            *guard = tier;
        }
    }

    /// Reconcile calls received, including failed ones
    pub fn request_count(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }

    /// Stored copy of a note
    pub fn stored(&self, id: &NoteId) -> Option<EncryptedNote> {
        self.inner
            .ledger
            .lock()
            .ok()
            .and_then(|ledger| ledger.get(id).cloned())
    }

    pub fn stored_count(&self) -> usize {
        self.inner.ledger.lock().map_or(0, |ledger| ledger.len())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("remote store unreachable".into()));
        }
        if self.inner.reject_auth.load(Ordering::SeqCst) {
            return Err(Error::Auth("token rejected (401)".into()));
        }
        Ok(())
    }
}

impl RemoteStore for InMemoryRemoteStore {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResponse> {
        self.inner.requests.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        let response = self
            .inner
            .ledger
            .lock()
            .map_err(|_| Error::Remote("ledger lock poisoned".into()))?
            .reconcile(request);

        let dropped = self
            .inner
            .drop_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if dropped {
            debug!(batch_id = %request.device_batch_id, "Dropping reconcile response");
            return Err(Error::Network("connection reset before response".into()));
        }
        Ok(response)
    }

    async fn account_salt(&self) -> Result<Salt> {
        self.check_reachable()?;
        let mut salt = self
            .inner
            .salt
            .lock()
            .map_err(|_| Error::Remote("salt lock poisoned".into()))?;
        Ok(salt.get_or_insert_with(Salt::generate).clone())
    }

    async fn entitlement(&self) -> Result<Tier> {
        self.check_reachable()?;
        self.inner
            .tier
            .lock()
            .map(|tier| *tier)
            .map_err(|_| Error::Remote("tier lock poisoned".into()))
    }
}
