use marginalia_core::Note;

use crate::commands::common::{
    format_note_lines, normalize_search_query, note_to_list_item, CliContext, NoteListItem,
};
use crate::error::CliError;

pub fn search_notes(query: &str, limit: usize, ctx: &CliContext) -> Result<Vec<Note>, CliError> {
    let normalized_query = normalize_search_query(query)?;
    let store = ctx.open_store()?;
    let mut notes = store.search(&normalized_query)?;
    notes.truncate(limit);
    Ok(notes)
}

pub fn run_search(
    query: &str,
    limit: usize,
    as_json: bool,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let notes = search_notes(query, limit, ctx)?;

    if as_json {
        let json_items = notes
            .iter()
            .map(note_to_list_item)
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}
