//! Per-account reconciliation state held in memory.

use std::collections::HashMap;

use marginalia_core::remote::{ReconcileRequest, ReconcileResponse, ReconciliationLedger};
use marginalia_core::Salt;
use tokio::sync::Mutex;

#[derive(Default)]
struct AccountState {
    ledger: ReconciliationLedger,
    salt: Option<Salt>,
}

/// Ledgers and KDF salts for every account seen so far
#[derive(Default)]
pub struct AccountStore {
    accounts: Mutex<HashMap<String, AccountState>>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AccountStoreSnapshot {
    pub accounts: usize,
    pub records: usize,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reconcile(&self, account_id: &str, request: &ReconcileRequest) -> ReconcileResponse {
        let mut accounts = self.accounts.lock().await;
        let state = accounts.entry(account_id.to_string()).or_default();
        state.ledger.reconcile(request)
    }

    /// The account's salt, created on first request
    pub async fn salt(&self, account_id: &str) -> Salt {
        let mut accounts = self.accounts.lock().await;
        let state = accounts.entry(account_id.to_string()).or_default();
        state.salt.get_or_insert_with(Salt::generate).clone()
    }

    pub async fn snapshot(&self) -> AccountStoreSnapshot {
        let accounts = self.accounts.lock().await;
        AccountStoreSnapshot {
            accounts: accounts.len(),
            records: accounts.values().map(|state| state.ledger.len()).sum(),
        }
    }
}
