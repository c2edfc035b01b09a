use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by endpoint and account
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    reconcile_limit: u32,
    account_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    Reconcile,
    /// Salt and entitlement lookups
    Account,
}

#[derive(Default)]
struct RateLimitMetrics {
    reconcile_allowed: AtomicU64,
    reconcile_limited: AtomicU64,
    account_allowed: AtomicU64,
    account_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub reconcile_allowed: u64,
    pub reconcile_limited: u64,
    pub account_allowed: u64,
    pub account_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.reconcile_rate_limit_per_window,
            config.account_rate_limit_per_window,
        )
    }

    fn new(window: Duration, reconcile_limit: u32, account_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            reconcile_limit,
            account_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(
        &self,
        endpoint: ProtectedEndpoint,
        account_id: &str,
    ) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Reconcile => self.reconcile_limit,
            ProtectedEndpoint::Account => self.account_limit,
        };

        let key = format!("{}:{account_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                account = account_fingerprint(account_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("Rate limit exceeded for {}", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            reconcile_allowed: self.metrics.reconcile_allowed.load(Ordering::Relaxed),
            reconcile_limited: self.metrics.reconcile_limited.load(Ordering::Relaxed),
            account_allowed: self.metrics.account_allowed.load(Ordering::Relaxed),
            account_limited: self.metrics.account_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::Reconcile, true) => &self.metrics.reconcile_allowed,
            (ProtectedEndpoint::Reconcile, false) => &self.metrics.reconcile_limited,
            (ProtectedEndpoint::Account, true) => &self.metrics.account_allowed,
            (ProtectedEndpoint::Account, false) => &self.metrics.account_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Account => "account",
        }
    }
}

/// Stable per-process hash so logs never carry raw account ids
pub fn account_fingerprint(account_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    account_id.hash(&mut hasher);
    hasher.finish()
}
