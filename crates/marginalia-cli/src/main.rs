//! Marginalia CLI - notes for the pages you read, from the terminal
//!
//! Works against the local store; `sync` reconciles with a remote store.

mod cli;
mod commands;
mod config_profiles;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddArgs};
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::{run_delete, run_delete_domain};
use crate::commands::edit::run_edit;
use crate::commands::history::{run_history, run_restore};
use crate::commands::list::run_list;
use crate::commands::search::run_search;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "marginalia=info,marginalia_core=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help().map_err(CliError::Io)?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
        Commands::Config { command } => run_config(command, cli.profile.as_deref()),
        command => {
            let ctx = CliContext::load(cli.db_path, cli.profile.as_deref())?;
            run_store_command(command, &ctx).await
        }
    }
}

async fn run_store_command(command: Commands, ctx: &CliContext) -> Result<(), CliError> {
    match command {
        Commands::Add {
            domain,
            url,
            title,
            tags,
            content,
        } => {
            let args = AddArgs {
                domain: domain.as_deref(),
                url: url.as_deref(),
                title: title.as_deref(),
                tags: &tags,
                content: &content,
            };
            run_add(&args, ctx)?;
        }
        Commands::List {
            domain,
            url,
            limit,
            json,
        } => run_list(domain.as_deref(), url.as_deref(), limit, json, ctx)?,
        Commands::Search { query, limit, json } => run_search(&query, limit, json, ctx)?,
        Commands::Edit { id, title } => {
            run_edit(&id, title.as_deref(), ctx)?;
        }
        Commands::Delete { id } => {
            run_delete(&id, ctx)?;
        }
        Commands::DeleteDomain { domain } => {
            run_delete_domain(&domain, ctx)?;
        }
        Commands::History { id, json } => run_history(&id, json, ctx)?,
        Commands::Restore { id, version, save } => {
            run_restore(&id, version, save, ctx)?;
        }
        Commands::Sync => {
            run_sync(ctx).await?;
        }
        Commands::Status { json } => run_status(json, ctx)?,
        Commands::Completions { .. } | Commands::Config { .. } => {}
    }
    Ok(())
}
