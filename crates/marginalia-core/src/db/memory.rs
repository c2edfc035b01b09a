//! In-memory storage, optionally size-limited

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::StorageBackend;
use crate::error::{Error, Result};

/// Volatile key/value storage.
///
/// With a quota set, any write that would push the total size of keys and
/// values past the limit fails with [`Error::QuotaExceeded`] and leaves the
/// contents untouched.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit total stored bytes
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total bytes currently stored
    pub fn used_bytes(&self) -> Result<usize> {
        let entries = self.entries.lock().map_err(|_| Error::poisoned())?;
        Ok(size_of_entries(&entries))
    }

    fn check_quota(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let used = size_of_entries(entries);
            if used > quota {
                return Err(Error::QuotaExceeded(format!(
                    "{used} bytes exceeds quota of {quota}"
                )));
            }
        }
        Ok(())
    }
}

fn size_of_entries(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| Error::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key.to_string(), value.to_string())], &[])
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().map_err(|_| Error::poisoned())?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn set_many(&self, writes: &[(String, String)], removals: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::poisoned())?;
        let mut next = entries.clone();
        for (key, value) in writes {
            next.insert(key.clone(), value.clone());
        }
        for key in removals {
            next.remove(key);
        }
        self.check_quota(&next)?;
        *entries = next;
        Ok(())
    }
}
