//! Note model

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([a-zA-Z][a-zA-Z0-9_-]*)").expect("Invalid regex"));

/// A unique identifier for a note, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A note scoped to a domain, optionally pinned to one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Unique identifier, stable across devices
    pub id: NoteId,
    /// Owning site key (normalized hostname)
    pub domain: String,
    /// Normalized page URL for page-scoped notes
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// SHA-256 hex digest of title, content and tags
    #[serde(default)]
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    /// Sole ordering key for last-write-wins
    pub updated_at: DateTime<Utc>,
    /// Soft delete flag, kept until the remote store confirms deletion
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Local mutations not yet confirmed by the remote store
    #[serde(default)]
    pub sync_pending: bool,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The content-bearing fields of a note, in plaintext
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlainFields {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl Note {
    /// Create a new note for the given domain
    #[must_use]
    pub fn new(domain: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut note = Self {
            id: NoteId::new(),
            domain: domain.into(),
            url: None,
            title: String::new(),
            content: content.into(),
            tags: Vec::new(),
            content_hash: String::new(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
            sync_pending: false,
            last_synced_at: None,
        };
        note.refresh_hash();
        note
    }

    /// Scope the note to a single page
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.refresh_hash();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.refresh_hash();
        self
    }

    /// Replace the content-bearing fields and recompute the hash
    pub fn set_fields(&mut self, fields: PlainFields) {
        self.title = fields.title;
        self.content = fields.content;
        self.tags = fields.tags;
        self.refresh_hash();
    }

    /// Hash of the current plaintext fields
    #[must_use]
    pub fn compute_hash(&self) -> String {
        content_hash(&self.title, &self.content, &self.tags)
    }

    pub fn refresh_hash(&mut self) {
        self.content_hash = self.compute_hash();
    }

    /// Get first line as title preview, truncated to `max_len` characters
    ///
    /// Falls back to the first content line when the title is blank.
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.content.lines().next().unwrap_or("")
        } else {
            self.title.as_str()
        };
        source.trim().chars().take(max_len).collect()
    }

    /// Check if note content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }

    /// Case-insensitive match against title, content and tags.
    ///
    /// `needle` must already be lowercased.
    #[must_use]
    pub fn matches_query(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.content.to_lowercase().contains(needle)
            || self.tags.iter().any(|tag| tag.contains(needle))
    }
}

/// Digest of the content-bearing fields.
///
/// Each field is length-prefixed so that moving text between title and
/// content always changes the digest.
#[must_use]
pub fn content_hash(title: &str, content: &str, tags: &[String]) -> String {
    let mut hasher = Sha256::new();
    for field in [title, content] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.update((tags.len() as u64).to_be_bytes());
    for tag in tags {
        hasher.update((tag.len() as u64).to_be_bytes());
        hasher.update(tag.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Extract #tags from text
///
/// Valid tags match the pattern: `#[a-zA-Z][a-zA-Z0-9_-]*`
/// Tags are returned in lowercase, deduplicated and sorted.
///
/// # Examples
///
/// ```
/// use marginalia_core::models::extract_tags;
///
/// let tags = extract_tags("Hello #world this is #Rust-lang");
/// assert_eq!(tags, vec!["rust-lang".to_string(), "world".to_string()]);
/// ```
#[must_use]
pub fn extract_tags(text: &str) -> Vec<String> {
    TAG_PATTERN
        .captures_iter(text)
        .map(|cap| cap[1].to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Merge explicit tags with inline #tags found in `content`.
///
/// Explicit tags are trimmed, stripped of a leading `#` and lowercased;
/// blanks are dropped. The result is deduplicated and sorted.
#[must_use]
pub fn normalize_tags(explicit: &[String], content: &str) -> Vec<String> {
    explicit
        .iter()
        .map(|tag| tag.trim().trim_start_matches('#').trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .chain(extract_tags(content))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::new();
        let id2 = NoteId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_parse() {
        let id = NoteId::new();
        let parsed: NoteId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_note_new() {
        let note = Note::new("example.com", "Hello world");
        assert_eq!(note.content, "Hello world");
        assert_eq!(note.domain, "example.com");
        assert!(!note.is_deleted);
        assert!(!note.sync_pending);
        assert_eq!(note.created_at, note.updated_at);
        assert_eq!(note.content_hash, note.compute_hash());
    }

    #[test]
    fn hash_changes_with_any_content_field() {
        let base = Note::new("example.com", "body");
        let retitled = base.clone().with_title("title");
        let retagged = base.clone().with_tags(["rust"]);
        assert_ne!(base.content_hash, retitled.content_hash);
        assert_ne!(base.content_hash, retagged.content_hash);
        assert_ne!(retitled.content_hash, retagged.content_hash);
    }

    #[test]
    fn hash_ignores_metadata() {
        let note = Note::new("example.com", "body");
        let mut moved = note.clone().with_url("https://example.com/a");
        moved.sync_pending = true;
        moved.updated_at = Utc::now();
        assert_eq!(note.compute_hash(), moved.compute_hash());
    }

    #[test]
    fn hash_is_boundary_sensitive() {
        assert_ne!(content_hash("ab", "c", &[]), content_hash("a", "bc", &[]));
    }

    #[test]
    fn test_extract_tags_basic() {
        let tags = extract_tags("Hello #world");
        assert_eq!(tags, vec!["world"]);
    }

    #[test]
    fn test_extract_tags_deduplication() {
        let tags = extract_tags("#hello #Hello #HELLO");
        assert_eq!(tags, vec!["hello"]);
    }

    #[test]
    fn test_extract_tags_invalid() {
        // Tags starting with numbers are invalid
        let tags = extract_tags("#123 #456test");
        assert!(tags.is_empty());
    }

    #[test]
    fn normalize_tags_merges_explicit_and_inline() {
        let tags = normalize_tags(
            &[" #Reading ".to_string(), String::new(), "later".to_string()],
            "check this #later and #Rust",
        );
        assert_eq!(tags, vec!["later", "reading", "rust"]);
    }

    #[test]
    fn test_title_preview() {
        let note = Note::new("example.com", "First line\nSecond line");
        assert_eq!(note.title_preview(50), "First line");
        assert_eq!(note.title_preview(5), "First");

        let titled = note.with_title("Heading");
        assert_eq!(titled.title_preview(50), "Heading");
    }

    #[test]
    fn matches_query_checks_all_fields() {
        let note = Note::new("example.com", "Body text")
            .with_title("Reading List")
            .with_tags(["later"]);
        assert!(note.matches_query("reading"));
        assert!(note.matches_query("body"));
        assert!(note.matches_query("late"));
        assert!(!note.matches_query("missing"));
    }

    #[test]
    fn note_serializes_camel_case() {
        let note = Note::new("example.com", "x");
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("contentHash").is_some());
        assert!(value.get("syncPending").is_some());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn note_deserializes_with_missing_optional_fields() {
        let raw = format!(
            r#"{{"id":"{}","domain":"example.com","createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-02T00:00:00Z"}}"#,
            NoteId::new()
        );
        let note: Note = serde_json::from_str(&raw).unwrap();
        assert!(note.url.is_none());
        assert!(note.tags.is_empty());
        assert!(!note.is_deleted);
    }
}
