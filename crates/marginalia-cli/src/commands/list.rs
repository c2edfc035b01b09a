use crate::commands::common::{format_note_lines, note_to_list_item, CliContext, NoteListItem};
use crate::error::CliError;

pub fn run_list(
    domain: Option<&str>,
    url: Option<&str>,
    limit: usize,
    as_json: bool,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let mut notes = match (url, domain) {
        (Some(url), _) => store.list_by_url(url)?,
        (None, Some(domain)) => store.list_by_domain(domain)?,
        (None, None) => store.list()?,
    };
    notes.truncate(limit);

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
