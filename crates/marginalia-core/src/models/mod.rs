//! Data models for Marginalia

mod draft;
mod note;
mod version;

pub use draft::EditorDraft;
pub use note::{content_hash, extract_tags, normalize_tags, Note, NoteId, PlainFields};
pub use version::{ChangeReason, NoteVersion};
