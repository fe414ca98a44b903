use padel_core::app::Startup;
use padel_core::auth::AuthBackend;
use padel_core::backend::SupabaseBackend;
use padel_core::config::ClientConfig;
use padel_core::models::{format_match_date, MatchRecord, Player, Team, TodoRecord};
use padel_core::records::{Record, RecordCollection};
use padel_core::{Identity, RecordId};
use serde::Serialize;

use crate::auth::KeyringSessionStore;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub type CliBackend = SupabaseBackend<KeyringSessionStore>;

const SHORT_ID_LEN: usize = 8;

/// Resolved profile plus the collaborator handle built from it.
pub struct CliContext {
    pub profile_name: String,
    pub config: ClientConfig,
    pub backend: CliBackend,
}

impl CliContext {
    pub fn matches(&self) -> RecordCollection<MatchRecord, CliBackend> {
        RecordCollection::with_table(self.backend.clone(), self.config.matches_table.clone())
    }

    pub fn todos(&self) -> RecordCollection<TodoRecord, CliBackend> {
        RecordCollection::with_table(self.backend.clone(), self.config.todos_table.clone())
    }

    pub async fn require_identity(&self) -> Result<Identity, CliError> {
        self.backend
            .current_session()
            .await
            .map_err(|error| CliError::Auth(error.to_string()))?
            .ok_or(CliError::NotSignedIn)
    }
}

pub fn resolve_client_config(
    global_profile: Option<&str>,
) -> Result<(String, ClientConfig), CliError> {
    let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = profiles.resolve_profile_name(global_profile);
    let profile = profiles.profile(&profile_name).cloned().unwrap_or_default();
    let config = profile
        .client_config()
        .map_err(|error| CliError::Config(error.to_string()))?
        .ok_or_else(|| {
            CliError::Config(format!(
                "Profile '{profile_name}' has no Supabase project. Run `padel config init --supabase-url <url> --supabase-anon-key <key>` or set SUPABASE_URL and SUPABASE_ANON_KEY."
            ))
        })?;
    Ok((profile_name, config))
}

pub fn open_context(global_profile: Option<&str>) -> Result<CliContext, CliError> {
    let (profile_name, config) = resolve_client_config(global_profile)?;
    let backend = SupabaseBackend::new(&config, KeyringSessionStore::for_profile(&profile_name))?;
    tracing::debug!("Using profile '{}' ({})", profile_name, config.supabase_url);
    Ok(CliContext {
        profile_name,
        config,
        backend,
    })
}

/// Application startup for long-running views; configuration problems
/// become the init-error screen instead of an early exit.
pub fn start_app(global_profile: Option<&str>) -> Startup<CliBackend> {
    match resolve_client_config(global_profile) {
        Ok((profile_name, config)) => {
            Startup::connect(Ok(config), KeyringSessionStore::for_profile(&profile_name))
        }
        Err(error) => Startup::InitError(error.to_string()),
    }
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Full id for an exact id or a unique prefix among `records`.
pub fn resolve_record_id<R: Record>(records: &[R], query: &str) -> Result<RecordId, CliError> {
    let query = normalize_record_identifier(query)?;
    if let Some(record) = records.iter().find(|record| record.id().as_str() == query) {
        return Ok(record.id().clone());
    }

    let matching: Vec<&RecordId> = records
        .iter()
        .map(|record| record.id())
        .filter(|id| id.as_str().starts_with(&query))
        .collect();
    match matching.as_slice() {
        [] => Err(CliError::RecordNotFound(query)),
        [id] => Ok((*id).clone()),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &RecordId) -> String {
    id.as_str().chars().take(SHORT_ID_LEN).collect()
}

/// First line of `text`, whitespace collapsed, cut to `max_chars`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn team_label(record: &MatchRecord, team: Team) -> String {
    record
        .team(team)
        .map(|player| player.name.as_str())
        .collect::<Vec<_>>()
        .join(" & ")
}

pub fn format_match_lines(records: &[MatchRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            format!(
                "{:<8}  {}  {:<24}  A: {} ({})  vs  B: {} ({})",
                short_id(&record.id),
                format_match_date(&record.match_date),
                preview(&record.location, 24),
                team_label(record, Team::A),
                record.score_label(Team::A),
                team_label(record, Team::B),
                record.score_label(Team::B),
            )
        })
        .collect()
}

pub fn format_todo_lines(records: &[TodoRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let mark = if record.is_complete { "x" } else { " " };
            format!(
                "{:<8}  [{mark}] {}",
                short_id(&record.id),
                preview(&record.title, 60)
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct MatchListItem {
    pub id: String,
    pub match_date: String,
    pub location: String,
    pub players: Vec<Player>,
    pub score_team_a: Option<i32>,
    pub score_team_b: Option<i32>,
}

impl From<&MatchRecord> for MatchListItem {
    fn from(record: &MatchRecord) -> Self {
        Self {
            id: record.id.to_string(),
            match_date: record.match_date.to_rfc3339(),
            location: record.location.clone(),
            players: record.players.clone(),
            score_team_a: record.score_team_a,
            score_team_b: record.score_team_b,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TodoListItem {
    pub id: String,
    pub title: String,
    pub is_complete: bool,
    pub created_at: Option<String>,
}

impl From<&TodoRecord> for TodoListItem {
    fn from(record: &TodoRecord) -> Self {
        Self {
            id: record.id.to_string(),
            title: record.title.clone(),
            is_complete: record.is_complete,
            created_at: record.created_at.map(|created_at| created_at.to_rfc3339()),
        }
    }
}
