//! Durable key/value storage backends for the local store

mod connection;
mod memory;
mod migrations;

pub use connection::SqliteBackend;
pub use memory::MemoryBackend;

use crate::error::Result;

/// Key/value persistence used by the local store and version manager.
///
/// Values are opaque strings (JSON documents in practice). Implementations
/// must make `set_many` atomic: either every write and removal lands or
/// none does.
pub trait StorageBackend: Send + Sync {
    /// Read a single value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a single value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key if present
    fn remove(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Apply a batch of writes and removals atomically
    fn set_many(&self, writes: &[(String, String)], removals: &[String]) -> Result<()>;
}
