//! Match model

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use super::{FieldError, RecordId};

/// Number of players in a doubles match
pub const PLAYERS_PER_MATCH: usize = 4;
/// Number of players on each side
pub const PLAYERS_PER_TEAM: usize = 2;

/// Side of the court a player belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

/// A named player assigned to a team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub team: Team,
}

impl Player {
    #[must_use]
    pub fn new(name: impl Into<String>, team: Team) -> Self {
        Self {
            name: name.into(),
            team,
        }
    }
}

/// Placeholder lineup used by a fresh match form.
#[must_use]
pub fn default_lineup() -> Vec<Player> {
    vec![
        Player::new("Player 1 (Team A)", Team::A),
        Player::new("Player 2 (Team A)", Team::A),
        Player::new("Player 3 (Team B)", Team::B),
        Player::new("Player 4 (Team B)", Team::B),
    ]
}

/// A match row from the `matches` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: RecordId,
    /// `timestamp` columns arrive without an offset and are read as UTC
    #[serde(deserialize_with = "deserialize_match_date")]
    pub match_date: DateTime<Utc>,
    pub location: String,
    /// Display order; only the team grouping carries meaning
    #[serde(default, deserialize_with = "deserialize_players")]
    pub players: Vec<Player>,
    #[serde(default)]
    pub score_team_a: Option<i32>,
    #[serde(default)]
    pub score_team_b: Option<i32>,
}

impl MatchRecord {
    /// Players of one team, in display order
    pub fn team(&self, team: Team) -> impl Iterator<Item = &Player> + '_ {
        self.players.iter().filter(move |player| player.team == team)
    }

    #[must_use]
    pub const fn score(&self, team: Team) -> Option<i32> {
        match team {
            Team::A => self.score_team_a,
            Team::B => self.score_team_b,
        }
    }

    /// Score for display, `N/A` while the match has not been scored
    #[must_use]
    pub fn score_label(&self, team: Team) -> String {
        self.score(team)
            .map_or_else(|| "N/A".to_string(), |score| score.to_string())
    }

    /// Apply a partial update in place
    pub fn apply_patch(&mut self, patch: &MatchPatch) {
        if let Some(match_date) = patch.match_date {
            self.match_date = match_date;
        }
        if let Some(location) = &patch.location {
            self.location.clone_from(location);
        }
        if let Some(players) = &patch.players {
            self.players.clone_from(players);
        }
        if let Some(score) = patch.score_team_a {
            self.score_team_a = score;
        }
        if let Some(score) = patch.score_team_b {
            self.score_team_b = score;
        }
    }
}

/// Insert payload for a new match; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMatch {
    pub match_date: DateTime<Utc>,
    pub location: String,
    pub players: Vec<Player>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_team_a: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_team_b: Option<i32>,
}

impl NewMatch {
    #[must_use]
    pub fn new(match_date: DateTime<Utc>, location: impl Into<String>) -> Self {
        Self {
            match_date,
            location: location.into(),
            players: default_lineup(),
            score_team_a: None,
            score_team_b: None,
        }
    }

    /// Check required fields and the 2+2 lineup.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.location.trim().is_empty() {
            errors.push(FieldError::required("location"));
        }
        errors.extend(validate_lineup(&self.players));
        errors.extend(validate_score("score_team_a", self.score_team_a));
        errors.extend(validate_score("score_team_b", self.score_team_b));
        errors
    }
}

/// Partial update for an existing match.
///
/// Outer `None` leaves a column untouched; `Some(None)` clears a score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Player>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_team_a: Option<Option<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_team_b: Option<Option<i32>>,
}

impl MatchPatch {
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self
            .location
            .as_ref()
            .is_some_and(|location| location.trim().is_empty())
        {
            errors.push(FieldError::required("location"));
        }
        if let Some(players) = &self.players {
            errors.extend(validate_lineup(players));
        }
        errors.extend(validate_score("score_team_a", self.score_team_a.flatten()));
        errors.extend(validate_score("score_team_b", self.score_team_b.flatten()));
        errors
    }
}

fn validate_lineup(players: &[Player]) -> Vec<FieldError> {
    if players.len() != PLAYERS_PER_MATCH {
        return vec![FieldError::invalid(
            "players",
            format!(
                "a match needs exactly {PLAYERS_PER_MATCH} players, got {}",
                players.len()
            ),
        )];
    }

    let team_a = players.iter().filter(|player| player.team == Team::A).count();
    if team_a == PLAYERS_PER_TEAM {
        Vec::new()
    } else {
        vec![FieldError::invalid(
            "players",
            format!("each team needs exactly {PLAYERS_PER_TEAM} players"),
        )]
    }
}

fn validate_score(field: &str, score: Option<i32>) -> Option<FieldError> {
    score
        .filter(|score| *score < 0)
        .map(|_| FieldError::invalid(field, format!("{field} must not be negative")))
}

/// Parse a match date typed by a user.
///
/// Accepts RFC 3339 as well as the `datetime-local` shapes
/// (`YYYY-MM-DDTHH:MM`, optional seconds, space separator) and a bare date.
/// Inputs without an offset are read as UTC.
#[must_use]
pub fn parse_match_date(raw: &str) -> Option<DateTime<Utc>> {
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_match_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_match_date(&raw)
        .ok_or_else(|| de::Error::custom(format!("unrecognized match date: {raw}")))
}

fn deserialize_players<'de, D>(deserializer: D) -> Result<Vec<Player>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Player>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Short human readable match date, e.g. `02 Jan 2024, 10:00`
#[must_use]
pub fn format_match_date(date: &DateTime<Utc>) -> String {
    date.format("%d %b %Y, %H:%M").to_string()
}
