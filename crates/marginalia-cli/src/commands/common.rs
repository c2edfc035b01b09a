use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use marginalia_core::db::SqliteBackend;
use marginalia_core::{
    EngineConfig, EntitlementGate, LocalStore, Note, NoteId, NoteVersion, RemoteConfig,
    StaticEntitlement, Tier,
};
use serde::Serialize;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Resolved profile and database location for one invocation
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub profile_name: String,
    pub profile: CliProfile,
}

impl CliContext {
    pub fn load(cli_db_path: Option<PathBuf>, profile: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        let db_path = resolve_db_path(
            cli_db_path,
            env::var("MARGINALIA_DB_PATH").ok(),
            profile.db_path.clone(),
        );
        Ok(Self {
            db_path,
            profile_name,
            profile,
        })
    }

    /// Context on an explicit database with an empty profile
    pub fn local(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            profile_name: "default".to_string(),
            profile: CliProfile::default(),
        }
    }

    /// Tier last reported by the server, free until the first sync
    pub fn tier(&self) -> Tier {
        self.profile.tier.unwrap_or_default()
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.profile.engine.clone().unwrap_or_default()
    }

    pub fn open_store(&self) -> Result<LocalStore, CliError> {
        self.open_store_with(Arc::new(StaticEntitlement(self.tier())))
    }

    pub fn open_store_with(
        &self,
        entitlement: Arc<dyn EntitlementGate>,
    ) -> Result<LocalStore, CliError> {
        let backend = SqliteBackend::open(&self.db_path)?;
        let store = LocalStore::open(Arc::new(backend), entitlement)?;
        let skipped = store.skipped_on_load();
        if skipped > 0 {
            eprintln!("Warning: skipped {skipped} unreadable record(s) while loading notes");
        }
        Ok(store)
    }

    pub fn remote_config(&self) -> Result<Option<RemoteConfig>, CliError> {
        self.remote_config_with(|name| env::var(name).ok())
    }

    /// Environment wins over the profile file
    pub fn remote_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<RemoteConfig>, CliError> {
        if let Some(config) = RemoteConfig::from_lookup(lookup)? {
            return Ok(Some(config));
        }
        match (self.profile.api_url(), self.profile.token()) {
            (Some(api_url), Some(token)) => Ok(Some(RemoteConfig::new(api_url, token)?)),
            _ => Ok(None),
        }
    }

    /// Persist the server-reported tier so offline commands retain the
    /// right number of versions
    pub fn remember_tier(&self, tier: Tier) -> Result<(), CliError> {
        if self.profile.tier == Some(tier) {
            return Ok(());
        }
        let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
        config.profile_mut_or_default(&self.profile_name).tier = Some(tier);
        config.save().map_err(CliError::Config)?;
        Ok(())
    }
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<String>,
    profile_db_path: Option<PathBuf>,
) -> PathBuf {
    cli_db_path
        .or_else(|| {
            env_db_path
                .and_then(|value| normalize_content(&value))
                .map(PathBuf::from)
        })
        .or(profile_db_path)
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("marginalia")
        .join("marginalia.db")
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub domain: String,
    pub url: Option<String>,
    pub title: String,
    pub preview: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub relative_time: String,
    pub tags: Vec<String>,
    pub sync_pending: bool,
}

#[derive(Debug, Serialize)]
pub struct VersionItem {
    pub version: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub preview: String,
    pub content_hash: String,
}

/// Resolve a full id or a unique id prefix to a live note
pub fn resolve_note(note_query: &str, store: &LocalStore) -> Result<Note, CliError> {
    if let Ok(note_id) = note_query.parse::<NoteId>() {
        if let Some(note) = store.get(&note_id)? {
            return Ok(note);
        }
    }

    let needle = note_query.to_lowercase();
    let mut matching = store
        .list()?
        .into_iter()
        .filter(|note| note.id.to_string().starts_with(&needle))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::NoteNotFound(note_query.to_string())),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|note| short_id(&note.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{note_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &NoteId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now = Utc::now();
    notes
        .iter()
        .map(|note| {
            let short_id = short_id(&note.id);
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now);
            let tags = render_tags(note);
            let pending = if note.sync_pending { "*" } else { " " };

            if tags.is_empty() {
                format!(
                    "{short_id:<13}{pending} {:<24}  {preview:<40}  {relative_time}",
                    note.domain
                )
            } else {
                format!(
                    "{short_id:<13}{pending} {:<24}  {preview:<40}  {relative_time:<10}  {tags}",
                    note.domain
                )
            }
        })
        .collect()
}

pub fn note_to_list_item(note: &Note) -> NoteListItem {
    NoteListItem {
        id: note.id.to_string(),
        domain: note.domain.clone(),
        url: note.url.clone(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        content: note.content.clone(),
        created_at: note.created_at,
        updated_at: note.updated_at,
        relative_time: format_relative_time(note.updated_at, Utc::now()),
        tags: note.tags.clone(),
        sync_pending: note.sync_pending,
    }
}

pub fn version_to_item(version: &NoteVersion) -> VersionItem {
    VersionItem {
        version: version.version,
        reason: version.change_reason.to_string(),
        created_at: version.created_at,
        title: version.title.clone(),
        preview: text_preview(&version.content, 60),
        content_hash: version.content_hash.clone(),
    }
}

pub fn format_version_lines(versions: &[NoteVersion]) -> Vec<String> {
    versions
        .iter()
        .map(|version| {
            format!(
                "v{:<4} {:<14} {}  {}",
                version.version,
                version.change_reason,
                format_timestamp(version.created_at),
                text_preview(&version.content, 50)
            )
        })
        .collect()
}

/// Title when set, otherwise the first content line
pub fn note_preview(note: &Note, max_chars: usize) -> String {
    if note.title.trim().is_empty() {
        text_preview(&note.content, max_chars)
    } else {
        text_preview(&note.title, max_chars)
    }
}

pub fn text_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn render_tags(note: &Note) -> String {
    note.tags
        .iter()
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now
        .signed_duration_since(timestamp)
        .num_milliseconds()
        .max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_search_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySearchQuery)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_note_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyNoteId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input() -> Result<Option<String>, CliError> {
    capture_editor_input_with_initial("")
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_note_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let note_content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&note_content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

pub fn create_temp_note_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("marginalia-note-{}-{now}.md", std::process::id()))
}
