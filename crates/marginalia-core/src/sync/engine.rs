//! Background sync engine

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::batch::SyncBatch;
use crate::config::EngineConfig;
use crate::crypto::{decrypt_note, derive_key_with_iterations, EncryptedNote, EncryptionKey};
use crate::entitlement::{EntitlementGate, Tier};
use crate::error::{Error, Result};
use crate::models::NoteId;
use crate::remote::{ReconcileResponse, RemoteStore};
use crate::state::{SyncState, SyncStatus};
use crate::store::{ApplyOutcome, LocalStore};

/// Upper bound on follow-up cycles within one `sync_now` call
const MAX_CYCLES_PER_SYNC: usize = 64;

/// Why a sync did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotSignedIn,
    /// Sync is limited to premium and the account is on the free tier
    NotEntitled,
    /// Sign-out or a store wipe happened while the request was in flight
    AccountChanged,
}

/// Counters for one `sync_now` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub cycles: usize,
    pub pushed: usize,
    pub deletions_pushed: usize,
    pub accepted: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Remote copies that replaced unsynced local edits
    pub conflicts: usize,
    pub remote_deletions: usize,
    pub undecryptable: Vec<NoteId>,
    /// Remote records that decrypted but could not be stored locally
    pub malformed: Vec<NoteId>,
}

/// Result of a sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
    Failed {
        error: String,
        /// The remote store rejected the credentials
        auth: bool,
        retry_in: Duration,
    },
}

impl SyncOutcome {
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

struct Session {
    key: EncryptionKey,
    generation: u64,
}

enum CycleError {
    /// The result belongs to a context that no longer exists
    Discarded,
    Failed(Error),
}

impl From<Error> for CycleError {
    fn from(error: Error) -> Self {
        match error {
            Error::Superseded => Self::Discarded,
            other => Self::Failed(other),
        }
    }
}

enum Progress {
    Done,
    More,
}

#[derive(Default)]
struct CycleState {
    last_outcome: Option<SyncOutcome>,
}

/// Drains pending local changes to a [`RemoteStore`] and applies what comes
/// back.
pub struct SyncEngine<R: RemoteStore> {
    store: Arc<LocalStore>,
    remote: R,
    entitlement: Arc<dyn EntitlementGate>,
    config: EngineConfig,
    session: RwLock<Option<Session>>,
    generation: AtomicU64,
    failures: AtomicU32,
    cycle: Mutex<CycleState>,
    status: watch::Sender<SyncStatus>,
    wake: Notify,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(
        store: Arc<LocalStore>,
        remote: R,
        entitlement: Arc<dyn EntitlementGate>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pending = store.pending_count()?;
        let (status, _) = watch::channel(SyncStatus {
            pending,
            ..SyncStatus::default()
        });
        Ok(Self {
            store,
            remote,
            entitlement,
            config,
            session: RwLock::new(None),
            generation: AtomicU64::new(0),
            failures: AtomicU32::new(0),
            cycle: Mutex::new(CycleState::default()),
            status,
            wake: Notify::new(),
        })
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Start a session with an already derived key
    pub fn sign_in(&self, key: EncryptionKey) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(key = %key.fingerprint(), generation, "Signed in");
        match self.session.write() {
            Ok(mut session) => *session = Some(Session { key, generation }),
            Err(poisoned) => *poisoned.into_inner() = Some(Session { key, generation }),
        }
        self.failures.store(0, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Derive the account key from `secret` and the remote salt, then sign in
    pub async fn sign_in_with_secret(&self, secret: &str) -> Result<()> {
        let salt = self.remote.account_salt().await?;
        let secret = secret.to_string();
        let iterations = self.config.kdf_iterations;
        let key = tokio::task::spawn_blocking(move || {
            derive_key_with_iterations(&secret, &salt, iterations)
        })
        .await
        .map_err(|e| Error::Encryption(format!("key derivation task failed: {e}")))??;
        self.sign_in(key);
        Ok(())
    }

    /// End the session. Results of an in-flight request are discarded.
    pub fn sign_out(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(error) = self.store.bump_epoch() {
            warn!(%error, "Could not invalidate in-flight sync writes");
        }
        match self.session.write() {
            Ok(mut session) => *session = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.failures.store(0, Ordering::SeqCst);
        self.status.send_modify(|status| {
            status.state = SyncState::Idle;
            status.last_error = None;
            status.consecutive_failures = 0;
            status.next_retry_in = None;
        });
        info!("Signed out");
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.read().is_ok_and(|session| session.is_some())
    }

    /// Ask the background loop to sync soon
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    fn session_snapshot(&self) -> Option<(EncryptionKey, u64)> {
        let session = self.session.read().ok()?;
        session
            .as_ref()
            .map(|session| (session.key.clone(), session.generation))
    }

    fn set_state(&self, state: SyncState) {
        self.status.send_modify(|status| status.state = state);
    }

    /// Run a sync now.
    ///
    /// If another sync is in flight, waits for it and returns its outcome
    /// instead of starting a second one.
    pub async fn sync_now(&self) -> SyncOutcome {
        let mut cycle = match self.cycle.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync already in flight, waiting for its outcome");
                let guard = self.cycle.lock().await;
                if let Some(outcome) = guard.last_outcome.clone() {
                    return outcome;
                }
                guard
            }
        };
        let outcome = self.run().await;
        cycle.last_outcome = Some(outcome.clone());
        outcome
    }

    async fn run(&self) -> SyncOutcome {
        let Some((key, generation)) = self.session_snapshot() else {
            debug!("Skipping sync: not signed in");
            return SyncOutcome::Skipped(SkipReason::NotSignedIn);
        };
        if self.config.sync_requires_premium && self.entitlement.current_tier() != Tier::Premium {
            debug!("Skipping sync: premium required");
            return SyncOutcome::Skipped(SkipReason::NotEntitled);
        }

        let epoch = self.store.epoch();
        let mut report = SyncReport::default();
        loop {
            report.cycles += 1;
            match self.run_cycle(&key, generation, epoch, &mut report).await {
                Ok(Progress::More) if report.cycles < MAX_CYCLES_PER_SYNC => {
                    debug!(cycle = report.cycles, "Batch was full, running another cycle");
                }
                Ok(_) => break,
                Err(CycleError::Discarded) => {
                    warn!("Discarding sync result: session or store changed");
                    self.set_state(SyncState::Idle);
                    return SyncOutcome::Skipped(SkipReason::AccountChanged);
                }
                Err(CycleError::Failed(error)) => return self.record_failure(&error),
            }
        }

        self.failures.store(0, Ordering::SeqCst);
        let pending = self.store.pending_count().unwrap_or_default();
        let now = Utc::now();
        self.status.send_modify(|status| {
            status.state = SyncState::Idle;
            status.last_synced_at = Some(now);
            status.last_error = None;
            status.consecutive_failures = 0;
            status.next_retry_in = None;
            status.pending = pending;
            status.undecryptable.clone_from(&report.undecryptable);
        });
        info!(
            cycles = report.cycles,
            pushed = report.pushed + report.deletions_pushed,
            pulled = report.inserted + report.updated,
            conflicts = report.conflicts,
            "Sync completed"
        );
        SyncOutcome::Completed(report)
    }

    fn record_failure(&self, error: &Error) -> SyncOutcome {
        let attempt = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let retry_in = self.config.retry.delay_for(attempt);
        let pending = self.store.pending_count().unwrap_or_default();
        warn!(attempt, retry_in = ?retry_in, %error, "Sync failed");
        self.status.send_modify(|status| {
            status.state = SyncState::Failed;
            status.last_error = Some(error.to_string());
            status.consecutive_failures = attempt;
            status.next_retry_in = Some(retry_in);
            status.pending = pending;
        });
        SyncOutcome::Failed {
            error: error.to_string(),
            auth: error.is_auth(),
            retry_in,
        }
    }

    fn ensure_current(&self, generation: u64, epoch: u64) -> std::result::Result<(), CycleError> {
        if self.generation.load(Ordering::SeqCst) == generation && self.store.epoch() == epoch {
            Ok(())
        } else {
            Err(CycleError::Discarded)
        }
    }

    async fn run_cycle(
        &self,
        key: &EncryptionKey,
        generation: u64,
        epoch: u64,
        report: &mut SyncReport,
    ) -> std::result::Result<Progress, CycleError> {
        self.set_state(SyncState::Batching);
        let mut meta = self.store.sync_meta()?;
        let pending_before = self.store.pending_count()?;
        let pending = self.store.pending_changes(self.config.batch_size)?;
        let batch = SyncBatch::collect(&meta.device_id, &pending, key)?;
        let request = batch.to_request(meta.last_server_time);
        debug!(
            batch_id = %batch.device_batch_id,
            notes = batch.notes.len(),
            deletions = batch.deletions.len(),
            "Sending batch"
        );

        self.set_state(SyncState::InFlight);
        let response = tokio::time::timeout(self.config.request_timeout, self.remote.reconcile(&request))
            .await
            .map_err(|_| Error::Network("reconcile request timed out".into()))??;

        self.ensure_current(generation, epoch)?;
        self.set_state(SyncState::Reconciling);
        let fully_applied = self.apply_response(&batch, &response, key, epoch, report)?;

        if fully_applied {
            meta.last_server_time = Some(response.server_time);
        }
        meta.last_synced_at = Some(Utc::now());
        self.ensure_current(generation, epoch)?;
        self.store.save_sync_meta_at(&meta, epoch)?;

        report.pushed += batch.notes.len();
        report.deletions_pushed += batch.deletions.len();
        report.accepted += response.accepted.len();

        let batch_was_full = batch.len() >= self.config.batch_size;
        let pending_after = self.store.pending_count()?;
        if batch_was_full && pending_after > 0 && pending_after < pending_before {
            Ok(Progress::More)
        } else {
            Ok(Progress::Done)
        }
    }

    /// Apply a reply locally. Returns false if some remote note could not
    /// be decrypted or stored, in which case the pull cursor must not
    /// advance.
    ///
    /// Every write checks `epoch` under the store's write guard, so a wipe
    /// or sign-out that lands mid-apply stops the rest with
    /// [`Error::Superseded`].
    fn apply_response(
        &self,
        batch: &SyncBatch,
        response: &ReconcileResponse,
        key: &EncryptionKey,
        epoch: u64,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let now = Utc::now();
        let accepted: HashSet<NoteId> = response.accepted.iter().copied().collect();

        let confirmed_notes: Vec<_> = batch
            .sent_notes
            .iter()
            .filter(|(id, _)| accepted.contains(id))
            .copied()
            .collect();
        let confirmed_deletions: Vec<_> = batch
            .sent_deletions
            .iter()
            .filter(|(id, _)| accepted.contains(id))
            .copied()
            .collect();
        self.store.mark_synced(&confirmed_notes, now, epoch)?;
        self.store.purge_tombstones(&confirmed_deletions, epoch)?;

        let mut fully_applied = true;
        for remote in response.conflicts.iter().chain(&response.missing_notes) {
            if !self.apply_remote_note(remote, key, now, epoch, report)? {
                fully_applied = false;
            }
        }
        Ok(fully_applied)
    }

    fn apply_remote_note(
        &self,
        remote: &EncryptedNote,
        key: &EncryptionKey,
        now: chrono::DateTime<Utc>,
        epoch: u64,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let applied = if remote.is_deleted {
            let deleted_at = remote.deleted_at.unwrap_or(remote.updated_at);
            self.store.apply_remote_tombstone(&remote.id, deleted_at, epoch)
        } else {
            match decrypt_note(remote, key) {
                Ok(note) => self.store.apply_remote(note, now, epoch),
                Err(error @ Error::Decryption { .. }) => {
                    error!(note_id = %remote.id, %error, "Skipping undecryptable remote note");
                    if !report.undecryptable.contains(&remote.id) {
                        report.undecryptable.push(remote.id);
                    }
                    return Ok(false);
                }
                Err(other) => return Err(other),
            }
        };
        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(error @ Error::InvalidInput(_)) => {
                error!(note_id = %remote.id, %error, "Skipping malformed remote note");
                if !report.malformed.contains(&remote.id) {
                    report.malformed.push(remote.id);
                }
                return Ok(false);
            }
            Err(other) => return Err(other),
        };

        match outcome {
            ApplyOutcome::Inserted => report.inserted += 1,
            ApplyOutcome::Updated => report.updated += 1,
            ApplyOutcome::Conflict => report.conflicts += 1,
            ApplyOutcome::Deleted => report.remote_deletions += 1,
            ApplyOutcome::Skipped => {}
        }
        Ok(true)
    }

    /// Run the engine in the background.
    ///
    /// Syncs once at start, then on the interval timer, after local changes
    /// (debounced) and on [`SyncEngine::request_sync`]. After a failure the
    /// next attempt waits for the retry delay and local changes do not cut
    /// it short.
    pub fn spawn(self: Arc<Self>) -> SyncHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run_loop(receiver));
        SyncHandle { shutdown, task }
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let changes = self.store.change_signal();
        let mut deadline = Instant::now();
        let mut backing_off = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep_until(deadline) => {}
                () = self.wake.notified() => {}
                () = changes.notified() => {
                    if backing_off {
                        continue;
                    }
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            () = tokio::time::sleep(self.config.change_debounce) => break,
                            () = changes.notified() => {}
                        }
                    }
                }
            }

            let outcome = self.sync_now().await;
            let delay = match &outcome {
                SyncOutcome::Failed { retry_in, .. } => {
                    backing_off = true;
                    *retry_in
                }
                _ => {
                    backing_off = false;
                    self.config.sync_interval
                }
            };
            deadline = Instant::now() + delay;
        }
        debug!("Sync loop stopped");
    }
}

/// Handle to a spawned sync loop
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync loop ended abnormally");
        }
    }
}
