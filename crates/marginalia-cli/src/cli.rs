use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "marginalia")]
#[command(about = "Encrypted notes for the pages you read")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for remote sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note for a page or site
    #[command(alias = "new")]
    Add {
        /// Site the note belongs to (derived from --url when omitted)
        #[arg(long)]
        domain: Option<String>,
        /// Page the note belongs to
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Tag to attach; repeatable
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Note content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
    /// List recent notes
    List {
        /// Only notes for this site
        #[arg(long, conflicts_with = "url")]
        domain: Option<String>,
        /// Only notes for this page
        #[arg(long)]
        url: Option<String>,
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search titles, content, tags and URLs
    Search {
        query: String,
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note in $EDITOR
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replace the title
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Delete every note for a site
    DeleteDomain { domain: String },
    /// Show saved versions of a note
    History {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a saved version, optionally restoring it
    Restore {
        /// Note ID or unique ID prefix
        id: String,
        /// Version number from `history`
        version: u64,
        /// Save the version as the current note
        #[arg(long)]
        save: bool,
    },
    /// Reconcile local notes with the remote store
    Sync,
    /// Show local store and sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Remote store base URL
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Bearer token for the remote store
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        /// Local database file for this profile
        #[arg(long, value_name = "PATH")]
        db_path: Option<PathBuf>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
