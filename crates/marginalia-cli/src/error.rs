use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] marginalia_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Edited note content cannot be empty")]
    EmptyEditedContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("Search query cannot be empty")]
    EmptySearchQuery,
    #[error("A note needs --domain or --url")]
    MissingDomain,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error("Sync skipped: {0}")]
    SyncSkipped(String),
    #[error(
        "Sync is not configured. Run `marginalia config init --api-url <URL> --token <TOKEN>`, or set MARGINALIA_API_URL and MARGINALIA_TOKEN."
    )]
    SyncNotConfigured,
    #[error("Set MARGINALIA_PASSPHRASE to unlock the account encryption key")]
    MissingPassphrase,
}
