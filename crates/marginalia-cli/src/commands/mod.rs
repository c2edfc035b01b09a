pub mod add;
pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod edit;
pub mod history;
pub mod list;
pub mod search;
pub mod status;
pub mod sync;
