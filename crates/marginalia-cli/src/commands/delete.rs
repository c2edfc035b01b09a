use marginalia_core::Note;

use crate::commands::common::{normalize_note_identifier, resolve_note, CliContext};
use crate::error::CliError;

pub fn run_delete(id: &str, ctx: &CliContext) -> Result<Note, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let store = ctx.open_store()?;
    let note = resolve_note(&normalized_id, &store)?;

    let tombstone = store.delete(&note.id)?;
    println!("{}", note.id);
    Ok(tombstone)
}

pub fn run_delete_domain(domain: &str, ctx: &CliContext) -> Result<usize, CliError> {
    let store = ctx.open_store()?;
    let count = store.delete_by_domain(domain)?;
    println!("Deleted {count} note(s)");
    Ok(count)
}
