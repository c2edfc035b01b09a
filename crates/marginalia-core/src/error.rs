//! Error types for marginalia-core

use thiserror::Error;

/// Result type alias using marginalia-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in marginalia-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Generic storage failure (lock poisoning, backend misuse)
    #[error("Storage error: {0}")]
    Storage(String),

    /// `SQLite` backend error
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted record could not be parsed
    #[error("Corrupt record at '{key}': {reason}")]
    StorageCorruption { key: String, reason: String },

    /// Local storage is full
    #[error("Local storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Note or version not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Authentication tag check failed (tampered payload or wrong key)
    #[error("Cannot decrypt {field} of note {note_id}")]
    Decryption { note_id: String, field: &'static str },

    /// Encryption or key derivation failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Transient transport failure talking to the remote store
    #[error("Network error: {0}")]
    Network(String),

    /// Remote store rejected our credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Remote store returned an unusable response
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The store was cleared or the session ended since the write was planned
    #[error("Local store changed while syncing")]
    Superseded,
}

impl Error {
    /// Whether the remote store rejected the account credentials.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub(crate) fn poisoned() -> Self {
        Self::Storage("storage lock poisoned".to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, _) = &error {
            if inner.code == rusqlite::ErrorCode::DiskFull {
                return Self::QuotaExceeded(error.to_string());
            }
        }
        Self::Sqlite(error)
    }
}
