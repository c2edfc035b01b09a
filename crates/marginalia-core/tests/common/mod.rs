//! Shared fixtures for multi-device scenarios

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use marginalia_core::crypto::{EncryptionKey, Salt};
use marginalia_core::db::MemoryBackend;
use marginalia_core::remote::{
    InMemoryRemoteStore, ReconcileRequest, ReconcileResponse, RemoteStore,
};
use marginalia_core::{
    EngineConfig, EntitlementGate, LocalStore, Note, Result, StaticEntitlement, SyncEngine,
    SyncOutcome, SyncReport, Tier,
};

pub const TEST_KDF_ITERATIONS: u32 = 1_000;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        kdf_iterations: TEST_KDF_ITERATIONS,
        ..EngineConfig::default()
    }
}

pub fn account_key(byte: u8) -> EncryptionKey {
    EncryptionKey::from_bytes([byte; 32])
}

/// One install of the app: a local store plus its engine
pub struct Device<R: RemoteStore> {
    pub store: Arc<LocalStore>,
    pub engine: Arc<SyncEngine<R>>,
}

impl<R: RemoteStore> Device<R> {
    pub fn new(remote: R, tier: Tier) -> Self {
        Self::with_config(remote, tier, test_config())
    }

    pub fn with_config(remote: R, tier: Tier, config: EngineConfig) -> Self {
        let entitlement: Arc<dyn EntitlementGate> = Arc::new(StaticEntitlement(tier));
        let store = Arc::new(
            LocalStore::open(Arc::new(MemoryBackend::new()), entitlement.clone()).unwrap(),
        );
        let engine = Arc::new(SyncEngine::new(store.clone(), remote, entitlement, config).unwrap());
        Self { store, engine }
    }

    pub fn signed_in(self, key: EncryptionKey) -> Self {
        self.engine.sign_in(key);
        self
    }

    /// Sync and insist that it completed
    pub async fn sync(&self) -> SyncReport {
        match self.engine.sync_now().await {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected completed sync, got {other:?}"),
        }
    }

    pub fn edit(&self, note: &Note, content: &str) -> Note {
        let mut next = note.clone();
        next.content = content.to_string();
        self.store.save(next).unwrap()
    }

    pub fn content_of(&self, note: &Note) -> Option<String> {
        self.store.get(&note.id).unwrap().map(|note| note.content)
    }
}

/// Device on a plain in-memory remote
pub fn device(remote: &InMemoryRemoteStore, key: EncryptionKey) -> Device<InMemoryRemoteStore> {
    Device::new(remote.clone(), Tier::Free).signed_in(key)
}

/// Ensure the next local stamp is strictly later than anything so far
pub async fn tick() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

/// Remote that takes a while to answer reconcile calls
#[derive(Clone)]
pub struct SlowRemote {
    pub inner: InMemoryRemoteStore,
    pub delay: Duration,
}

impl RemoteStore for SlowRemote {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.reconcile(request).await
    }

    async fn account_salt(&self) -> Result<Salt> {
        self.inner.account_salt().await
    }

    async fn entitlement(&self) -> Result<Tier> {
        self.inner.entitlement().await
    }
}
