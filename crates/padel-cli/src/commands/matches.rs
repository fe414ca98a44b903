use padel_core::form::{FormState, MatchDraft};
use padel_core::models::{MatchPatch, PLAYERS_PER_MATCH};

use crate::cli::MatchCommands;
use crate::commands::common::{
    format_match_lines, open_context, resolve_record_id, short_id, CliContext, MatchListItem,
};
use crate::commands::watch::{run_watch, WatchTarget};
use crate::error::CliError;

pub async fn run_matches(
    command: MatchCommands,
    global_profile: Option<&str>,
) -> Result<(), CliError> {
    if let MatchCommands::Watch = command {
        return run_watch(global_profile, WatchTarget::Matches).await;
    }

    let context = open_context(global_profile)?;
    context.require_identity().await?;
    match command {
        MatchCommands::List { json } => run_list(&context, json).await,
        MatchCommands::Add {
            date,
            location,
            players,
            score_a,
            score_b,
        } => {
            let mut form = build_match_form(&date, &location, &players, score_a, score_b)?;
            let result = form.submit(&context.matches()).await;
            let record = result.map_err(|error| {
                CliError::Save(form.error.take().unwrap_or_else(|| error.to_string()))
            })?;
            println!("{}", record.id);
            Ok(())
        }
        MatchCommands::Score {
            id,
            score_a,
            score_b,
        } => {
            let matches = context.matches();
            matches.fetch().await?;
            let id = resolve_record_id(&matches.records(), &id)?;
            let patch = MatchPatch {
                score_team_a: Some(Some(score_to_i32(score_a)?)),
                score_team_b: Some(Some(score_to_i32(score_b)?)),
                ..MatchPatch::default()
            };
            matches.update(&id, patch).await?;
            println!("{}", short_id(&id));
            Ok(())
        }
        MatchCommands::Delete { id } => {
            let matches = context.matches();
            matches.fetch().await?;
            let id = resolve_record_id(&matches.records(), &id)?;
            matches.delete(&id).await?;
            println!("{id}");
            Ok(())
        }
        MatchCommands::Watch => run_watch(global_profile, WatchTarget::Matches).await,
    }
}

async fn run_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let matches = context.matches();
    matches.fetch().await?;
    let records = matches.records();
    if as_json {
        let items = records.iter().map(MatchListItem::from).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if records.is_empty() {
        println!("No matches yet.");
    } else {
        for line in format_match_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

fn score_to_i32(score: u32) -> Result<i32, CliError> {
    i32::try_from(score).map_err(|_| CliError::Save(format!("Score {score} is out of range")))
}

/// Fill a match form from command-line values.
pub fn build_match_form(
    date: &str,
    location: &str,
    players: &[String],
    score_a: Option<String>,
    score_b: Option<String>,
) -> Result<FormState<MatchDraft>, CliError> {
    if players.len() > PLAYERS_PER_MATCH {
        return Err(CliError::Save(format!(
            "A match has {PLAYERS_PER_MATCH} players, got {}",
            players.len()
        )));
    }

    let mut form = FormState::<MatchDraft>::default();
    form.open();
    form.set_field("match_date", date)?;
    form.set_field("location", location)?;
    for (index, name) in players.iter().enumerate() {
        form.set_field(&format!("players[{index}]"), name)?;
    }
    if let Some(score) = score_a {
        form.set_field("score_team_a", &score)?;
    }
    if let Some(score) = score_b {
        form.set_field("score_team_b", &score)?;
    }
    Ok(form)
}
