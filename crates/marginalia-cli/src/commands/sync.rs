use std::env;
use std::sync::Arc;

use marginalia_core::remote::{HttpRemoteStore, RemoteStore};
use marginalia_core::sync::SkipReason;
use marginalia_core::{
    EntitlementGate, StaticEntitlement, SyncEngine, SyncOutcome, SyncReport, Tier,
};

use crate::commands::common::{normalize_content, short_id, CliContext};
use crate::error::CliError;

pub async fn run_sync(ctx: &CliContext) -> Result<SyncReport, CliError> {
    let Some(remote_config) = ctx.remote_config()? else {
        return Err(CliError::SyncNotConfigured);
    };
    let passphrase = passphrase_from(|name| env::var(name).ok())?;
    let remote = HttpRemoteStore::new(&remote_config)?;

    let tier = remote.entitlement().await?;
    if let Err(error) = ctx.remember_tier(tier) {
        tracing::warn!(%error, "Could not cache account tier");
    }

    let report = run_sync_with(ctx, remote, tier, &passphrase).await?;
    print_report(&report);
    Ok(report)
}

/// One sync against `remote` for an account on `tier`
pub async fn run_sync_with<R: RemoteStore>(
    ctx: &CliContext,
    remote: R,
    tier: Tier,
    passphrase: &str,
) -> Result<SyncReport, CliError> {
    let entitlement: Arc<dyn EntitlementGate> = Arc::new(StaticEntitlement(tier));
    let store = Arc::new(ctx.open_store_with(entitlement.clone())?);
    let engine = SyncEngine::new(store, remote, entitlement, ctx.engine_config())?;
    engine.sign_in_with_secret(passphrase).await?;

    match engine.sync_now().await {
        SyncOutcome::Completed(report) => Ok(report),
        SyncOutcome::Skipped(SkipReason::NotEntitled) => Err(CliError::SyncSkipped(
            "sync requires a premium account".to_string(),
        )),
        SyncOutcome::Skipped(reason) => Err(CliError::SyncSkipped(format!("{reason:?}"))),
        SyncOutcome::Failed { error, auth: true, .. } => Err(CliError::Auth(error)),
        SyncOutcome::Failed { error, .. } => Err(CliError::SyncFailed(error)),
    }
}

pub fn passphrase_from(lookup: impl Fn(&str) -> Option<String>) -> Result<String, CliError> {
    lookup("MARGINALIA_PASSPHRASE")
        .and_then(|value| normalize_content(&value))
        .ok_or(CliError::MissingPassphrase)
}

fn print_report(report: &SyncReport) {
    println!(
        "Sync completed: pushed {} note(s) and {} deletion(s), pulled {} note(s), {} remote deletion(s), {} conflict(s)",
        report.pushed,
        report.deletions_pushed,
        report.inserted + report.updated,
        report.remote_deletions,
        report.conflicts
    );
    if !report.undecryptable.is_empty() {
        let ids = report
            .undecryptable
            .iter()
            .map(short_id)
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!(
            "Warning: {} remote note(s) could not be decrypted with this passphrase: {ids}",
            report.undecryptable.len()
        );
    }
    if !report.malformed.is_empty() {
        let ids = report
            .malformed
            .iter()
            .map(short_id)
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!(
            "Warning: {} remote note(s) were malformed and skipped: {ids}",
            report.malformed.len()
        );
    }
}
