use marginalia_core::Note;

use crate::commands::common::{normalize_content, resolve_note_content, CliContext};
use crate::error::CliError;

pub struct AddArgs<'a> {
    pub domain: Option<&'a str>,
    pub url: Option<&'a str>,
    pub title: Option<&'a str>,
    pub tags: &'a [String],
    pub content: &'a [String],
}

pub fn run_add(args: &AddArgs<'_>, ctx: &CliContext) -> Result<Note, CliError> {
    let domain = args.domain.and_then(normalize_content);
    let url = args.url.and_then(normalize_content);
    if domain.is_none() && url.is_none() {
        return Err(CliError::MissingDomain);
    }
    let content = resolve_note_content(args.content)?;

    let mut note = Note::new(domain.unwrap_or_default(), content).with_tags(args.tags.iter());
    if let Some(url) = url {
        note = note.with_url(url);
    }
    if let Some(title) = args.title.and_then(normalize_content) {
        note = note.with_title(title);
    }

    let store = ctx.open_store()?;
    let note = store.save(note)?;
    println!("{}", note.id);
    Ok(note)
}
