use marginalia_core::{ChangeReason, Note};

use crate::commands::common::{
    format_version_lines, normalize_note_identifier, resolve_note, version_to_item, CliContext,
    VersionItem,
};
use crate::error::CliError;

pub fn run_history(id: &str, as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let store = ctx.open_store()?;
    let note = resolve_note(&normalized_id, &store)?;
    let versions = store.get_version_history(&note.id)?;

    if as_json {
        let json_items = versions
            .iter()
            .map(version_to_item)
            .collect::<Vec<VersionItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("No saved versions for {}", note.id);
        return Ok(());
    }
    for line in format_version_lines(&versions) {
        println!("{line}");
    }
    Ok(())
}

/// Print version `version` of a note; with `save`, make it current
pub fn run_restore(
    id: &str,
    version: u64,
    save: bool,
    ctx: &CliContext,
) -> Result<Note, CliError> {
    let normalized_id = normalize_note_identifier(id)?;
    let store = ctx.open_store()?;
    let note_id = match normalized_id.parse() {
        Ok(note_id) => note_id,
        Err(_) => resolve_note(&normalized_id, &store)?.id,
    };

    let draft = store.restore_version(&note_id, version)?;
    if !save {
        println!("{}", draft.content);
        return Ok(draft);
    }

    let restored = store.save_with_reason(draft, ChangeReason::Restore)?;
    println!("{}", restored.id);
    Ok(restored)
}
