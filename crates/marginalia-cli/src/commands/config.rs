use std::env;
use std::path::PathBuf;

use marginalia_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::config_profiles::{normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_url,
            token,
            db_path,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            api_url,
            token,
            db_path,
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    profile_name: Option<&str>,
    api_url: Option<String>,
    token: Option<String>,
    db_path: Option<PathBuf>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing_profile = config.profile(&profile_name).cloned().unwrap_or_default();

    let api_url = normalize_text_option(api_url)
        .or_else(|| normalize_text_option(env::var("MARGINALIA_API_URL").ok()));
    let token = normalize_text_option(token)
        .or_else(|| normalize_text_option(env::var("MARGINALIA_TOKEN").ok()));
    let merged = merge_profile(&existing_profile, api_url, token, db_path)?;

    *config.profile_mut_or_default(&profile_name) = merged;
    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.clone());
    }
    let path = config.save().map_err(CliError::Config)?;

    println!("Saved profile '{profile_name}' to {}", path.display());
    Ok(())
}

/// Overlay explicit values on an existing profile
pub fn merge_profile(
    existing: &CliProfile,
    api_url: Option<String>,
    token: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<CliProfile, CliError> {
    let api_url = api_url.or_else(|| existing.api_url());
    if let Some(url) = api_url.as_deref() {
        if !is_http_url(url) {
            return Err(CliError::Config(format!(
                "API URL must start with http:// or https://: {url}"
            )));
        }
    }

    Ok(CliProfile {
        api_url: api_url.map(|url| url.trim_end_matches('/').to_string()),
        token: token.or_else(|| existing.token()),
        db_path: db_path.or_else(|| existing.db_path.clone()),
        tier: existing.tier,
        engine: existing.engine.clone(),
    })
}

fn run_config_show(global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(global_profile);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured");
        return Ok(());
    };

    let mut shown = profile.clone();
    if shown.token.is_some() {
        shown.token = Some("[REDACTED]".to_string());
    }
    println!("Profile: {profile_name}");
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}
