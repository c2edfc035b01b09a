use chrono::Utc;
use marginalia_core::{EditorDraft, LocalStore, Note};

use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_note_identifier,
    resolve_note, CliContext,
};
use crate::error::CliError;

pub fn run_edit(id: &str, title: Option<&str>, ctx: &CliContext) -> Result<Note, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let store = ctx.open_store()?;
    let note = resolve_note(&normalized_id, &store)?;

    let initial = recovered_draft(&store, &note)?.unwrap_or_else(|| note.content.clone());
    let Some(edited_content) = capture_editor_input_with_initial(&initial)? else {
        return Err(CliError::EmptyEditedContent);
    };

    let updated = apply_edit(&store, &note, edited_content, title)?;
    println!("{}", updated.id);
    Ok(updated)
}

/// Save edited content, keeping a draft until the write succeeds
pub fn apply_edit(
    store: &LocalStore,
    note: &Note,
    content: String,
    title: Option<&str>,
) -> Result<Note, CliError> {
    let title = title.and_then(normalize_content);
    if content == note.content && title.as_ref().map_or(true, |title| *title == note.title) {
        store.clear_draft()?;
        return Ok(note.clone());
    }

    let mut next = note.clone();
    next.content = content;
    if let Some(title) = title {
        next.title = title;
    }

    store.save_draft(&draft_of(&next))?;
    let saved = store.save(next)?;
    store.clear_draft()?;
    Ok(saved)
}

fn draft_of(note: &Note) -> EditorDraft {
    EditorDraft {
        note_id: Some(note.id),
        domain: note.domain.clone(),
        url: note.url.clone(),
        title: note.title.clone(),
        content: note.content.clone(),
        tags: note.tags.clone(),
        saved_at: Utc::now(),
    }
}

/// Content of an unsaved edit to `note` left behind by an earlier run
fn recovered_draft(store: &LocalStore, note: &Note) -> Result<Option<String>, CliError> {
    let Some(draft) = store.load_draft()? else {
        return Ok(None);
    };
    if draft.note_id != Some(note.id) || draft.content == note.content {
        return Ok(None);
    }
    eprintln!("Resuming unsaved edit from {}", draft.saved_at.to_rfc3339());
    Ok(Some(draft.content))
}
