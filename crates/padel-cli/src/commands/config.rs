use std::env;

use padel_core::config::{DEFAULT_MATCHES_TABLE, DEFAULT_TODOS_TABLE};
use padel_core::util::{is_http_url, normalize_text_option};

use crate::cli::ConfigCommands;
use crate::config_profiles::{default_config_path, CliProfile, CliProfilesConfig};
use crate::error::CliError;

const VISIBLE_KEY_CHARS: usize = 6;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            supabase_url,
            supabase_anon_key,
            matches_table,
            todos_table,
            no_activate,
        } => run_config_init(
            global_profile,
            ProfileValues {
                supabase_url,
                supabase_anon_key,
                matches_table,
                todos_table,
            },
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

/// Values passed on the command line; `None` keeps what is already stored.
#[derive(Debug, Default)]
pub struct ProfileValues {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub matches_table: Option<String>,
    pub todos_table: Option<String>,
}

#[allow(clippy::needless_pass_by_value)]
fn run_config_init(
    profile_name: Option<&str>,
    values: ProfileValues,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();
    let merged = merge_profile(&existing, values, |key| env::var(key).ok());
    validate_profile(&merged)?;

    *config.profile_mut_or_default(&profile_name) = merged.clone();
    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{}' initialized at {}", profile_name, path.display());

    let missing = missing_fields(&merged);
    if missing.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Run `padel auth login --email <email> --password <password>`."
        );
    } else {
        println!("Profile '{}' is missing: {}", profile_name, missing.join(", "));
    }
    Ok(())
}

fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let profile = config.profile(&profile_name).cloned().unwrap_or_default();
    let path = default_config_path().map_err(CliError::Config)?;

    println!("Config file: {}", path.display());
    println!("Profile:     {profile_name}");
    println!(
        "URL:         {}",
        profile.supabase_url().unwrap_or_else(|| "(unset)".to_string())
    );
    println!(
        "Anon key:    {}",
        profile
            .supabase_anon_key()
            .map_or_else(|| "(unset)".to_string(), |key| redact_key(&key))
    );
    println!(
        "Tables:      {}, {}",
        profile.matches_table.as_deref().unwrap_or(DEFAULT_MATCHES_TABLE),
        profile.todos_table.as_deref().unwrap_or(DEFAULT_TODOS_TABLE)
    );
    Ok(())
}

/// Explicit flag, then the environment, then the stored profile.
pub fn merge_profile(
    existing: &CliProfile,
    values: ProfileValues,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> CliProfile {
    CliProfile {
        supabase_url: normalize_text_option(values.supabase_url)
            .or_else(|| normalize_text_option(env_lookup("SUPABASE_URL")))
            .or_else(|| existing.supabase_url())
            .map(|url| url.trim_end_matches('/').to_string()),
        supabase_anon_key: normalize_text_option(values.supabase_anon_key)
            .or_else(|| normalize_text_option(env_lookup("SUPABASE_ANON_KEY")))
            .or_else(|| existing.supabase_anon_key()),
        matches_table: normalize_text_option(values.matches_table)
            .or_else(|| normalize_text_option(existing.matches_table.clone())),
        todos_table: normalize_text_option(values.todos_table)
            .or_else(|| normalize_text_option(existing.todos_table.clone())),
    }
}

fn validate_profile(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.supabase_url() {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "supabase_url must include http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn missing_fields(profile: &CliProfile) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if profile.supabase_url().is_none() {
        missing.push("supabase_url");
    }
    if profile.supabase_anon_key().is_none() {
        missing.push("supabase_anon_key");
    }
    missing
}

pub fn redact_key(key: &str) -> String {
    if key.chars().count() <= VISIBLE_KEY_CHARS {
        return "****".to_string();
    }
    let visible: String = key.chars().take(VISIBLE_KEY_CHARS).collect();
    format!("{visible}****")
}
