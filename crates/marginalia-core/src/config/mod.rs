//! Sync engine and remote endpoint configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KDF_ITERATIONS;
use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Exponential backoff shared by every sync failure path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let seconds = self.base_delay.as_secs_f64() * factor;
        if !seconds.is_finite() || seconds >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(seconds)
    }
}

/// Tuning for [`crate::sync::SyncEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on records per reconciliation request
    pub batch_size: usize,
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,
    /// Quiet period after a local change before syncing
    #[serde(with = "duration_secs")]
    pub change_debounce: Duration,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Only sync for premium accounts
    pub sync_requires_premium: bool,
    pub kdf_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sync_interval: Duration::from_secs(60),
            change_debounce: Duration::from_secs(2),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            sync_requires_premium: false,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.kdf_iterations == 0 {
            return Err(Error::Config("kdf_iterations must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request_timeout must be positive".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::Config(
                "retry base_delay must not exceed max_delay".into(),
            ));
        }
        Ok(())
    }
}

/// Where and as whom to reach the remote store
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL without trailing slash, e.g. `https://api.example.com`
    pub api_url: String,
    /// Bearer token for the account
    pub token: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let api_url = normalize_text_option(Some(api_url.into()))
            .ok_or_else(|| Error::Config("API URL is required".into()))?;
        if !is_http_url(&api_url) {
            return Err(Error::Config(
                "API URL must start with http:// or https://".into(),
            ));
        }
        let token = normalize_text_option(Some(token.into()))
            .ok_or_else(|| Error::Config("API token is required".into()))?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Read `MARGINALIA_API_URL` and `MARGINALIA_TOKEN` through `lookup`.
    ///
    /// Returns `Ok(None)` when neither is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let api_url = normalize_text_option(lookup("MARGINALIA_API_URL"));
        let token = normalize_text_option(lookup("MARGINALIA_TOKEN"));
        match (api_url, token) {
            (None, None) => Ok(None),
            (Some(api_url), Some(token)) => Self::new(api_url, token).map(Some),
            (Some(_), None) => Err(Error::Config("MARGINALIA_TOKEN is not set".into())),
            (None, Some(_)) => Err(Error::Config("MARGINALIA_API_URL is not set".into())),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(9), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.kdf_iterations, 210_000);
        assert!(!config.sync_requires_premium);
        config.validate().unwrap();
    }

    #[test]
    fn engine_config_parses_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"batch_size": 10, "change_debounce": 0.5}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.change_debounce, Duration::from_millis(500));
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn engine_config_rejects_zero_batch() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn remote_config_from_lookup() {
        let values = HashMap::from([
            ("MARGINALIA_API_URL", "https://api.example.com/"),
            ("MARGINALIA_TOKEN", " secret "),
        ]);
        let config = RemoteConfig::from_lookup(|name| values.get(name).map(|v| (*v).to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(config.api_url, "https://api.example.com");
        assert_eq!(config.token, "secret");
        assert!(!format!("{config:?}").contains("secret"));

        assert!(RemoteConfig::from_lookup(|_| None).unwrap().is_none());
        assert!(RemoteConfig::from_lookup(|name| {
            (name == "MARGINALIA_API_URL").then(|| "ftp://nope".to_string())
        })
        .is_err());
    }
}
