use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::commands::common::{format_timestamp, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub db_path: PathBuf,
    pub tier: String,
    pub remote_configured: bool,
    pub device_id: String,
    pub notes: usize,
    pub pending: usize,
    pub pending_deletions: usize,
    pub unreadable_records: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_server_time: Option<DateTime<Utc>>,
}

pub fn collect_status(ctx: &CliContext) -> Result<StatusReport, CliError> {
    let store = ctx.open_store()?;
    let meta = store.sync_meta()?;
    let pending = store.pending_changes(usize::MAX)?;

    Ok(StatusReport {
        profile: ctx.profile_name.clone(),
        db_path: ctx.db_path.clone(),
        tier: ctx.tier().to_string(),
        remote_configured: ctx.remote_config().ok().flatten().is_some(),
        device_id: meta.device_id,
        notes: store.list()?.len(),
        pending: pending.len(),
        pending_deletions: pending.iter().filter(|note| note.is_deleted).count(),
        unreadable_records: store.skipped_on_load(),
        last_synced_at: meta.last_synced_at,
        last_server_time: meta.last_server_time,
    })
}

pub fn run_status(as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let status = collect_status(ctx)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Profile:      {}", status.profile);
    println!("Database:     {}", status.db_path.display());
    println!("Tier:         {}", status.tier);
    println!("Device:       {}", status.device_id);
    println!("Notes:        {}", status.notes);
    println!(
        "Pending:      {} ({} deletion(s))",
        status.pending, status.pending_deletions
    );
    if status.unreadable_records > 0 {
        println!("Unreadable:   {}", status.unreadable_records);
    }
    let last_synced = status
        .last_synced_at
        .map_or_else(|| "never".to_string(), format_timestamp);
    println!("Last sync:    {last_synced}");
    if !status.remote_configured {
        println!("Sync is not configured for this profile.");
    }
    Ok(())
}
