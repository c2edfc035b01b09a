use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fmt;
use std::time::Duration;

use marginalia_core::Tier;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Account a bearer token signs in as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub account_id: String,
    pub tier: Tier,
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Bearer token to account
    pub tokens: HashMap<String, AccountConfig>,
    pub rate_limit_window: Duration,
    pub reconcile_rate_limit_per_window: u32,
    pub account_rate_limit_per_window: u32,
    /// Upper bound on notes plus deletions in one reconcile request
    pub max_batch_size: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accounts: BTreeMap<&str, Tier> = self
            .tokens
            .values()
            .map(|account| (account.account_id.as_str(), account.tier))
            .collect();
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("tokens", &"[REDACTED]")
            .field("accounts", &accounts)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "reconcile_rate_limit_per_window",
                &self.reconcile_rate_limit_per_window,
            )
            .field(
                "account_rate_limit_per_window",
                &self.account_rate_limit_per_window,
            )
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    /// Reads `MARGINALIA_API_TOKENS` as comma-separated `token=account`
    /// pairs and `MARGINALIA_API_PREMIUM_ACCOUNTS` as account ids.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "MARGINALIA_API_BIND_ADDR", "127.0.0.1:8080");

        let premium: HashSet<String> = optional_trimmed(&lookup, "MARGINALIA_API_PREMIUM_ACCOUNTS")
            .map(|raw| split_list(&raw).map(str::to_string).collect())
            .unwrap_or_default();
        let tokens = parse_tokens(
            &required_trimmed(&lookup, "MARGINALIA_API_TOKENS")?,
            &premium,
        )?;

        let rate_limit_window_secs = parse_in_range(
            &lookup,
            "RATE_LIMIT_WINDOW_SECS",
            "60",
            10..=3_600,
        )?;
        let reconcile_rate_limit_per_window = parse_in_range(
            &lookup,
            "RECONCILE_RATE_LIMIT_PER_WINDOW",
            "120",
            1..=10_000,
        )?;
        let account_rate_limit_per_window = parse_in_range(
            &lookup,
            "ACCOUNT_RATE_LIMIT_PER_WINDOW",
            "60",
            1..=10_000,
        )?;
        let max_batch_size = parse_in_range(&lookup, "MAX_BATCH_SIZE", "500", 1..=10_000)?;

        Ok(Self {
            bind_addr,
            tokens,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            reconcile_rate_limit_per_window,
            account_rate_limit_per_window,
            max_batch_size,
        })
    }
}

fn parse_tokens(
    raw: &str,
    premium: &HashSet<String>,
) -> Result<HashMap<String, AccountConfig>, ConfigError> {
    let mut tokens = HashMap::new();
    for entry in split_list(raw) {
        let (token, account_id) = entry.split_once('=').ok_or_else(|| {
            ConfigError::Invalid("MARGINALIA_API_TOKENS entries must be `token=account`".into())
        })?;
        let (token, account_id) = (token.trim(), account_id.trim());
        if token.is_empty() || account_id.is_empty() {
            return Err(ConfigError::Invalid(
                "MARGINALIA_API_TOKENS entries need a token and an account".into(),
            ));
        }
        let account = AccountConfig {
            account_id: account_id.to_string(),
            tier: if premium.contains(account_id) {
                Tier::Premium
            } else {
                Tier::Free
            },
        };
        if tokens.insert(token.to_string(), account).is_some() {
            return Err(ConfigError::Invalid(
                "MARGINALIA_API_TOKENS lists the same token twice".into(),
            ));
        }
    }
    if tokens.is_empty() {
        return Err(ConfigError::MissingVar("MARGINALIA_API_TOKENS"));
    }
    Ok(tokens)
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_in_range<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
    range: std::ops::RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display,
{
    let invalid = || {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    };
    let value = value_or_default(lookup, name, default)
        .parse::<T>()
        .map_err(|_| invalid())?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
