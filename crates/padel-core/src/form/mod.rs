//! Form State for the "new record" modals.

use crate::data::DataBackend;
use crate::models::{
    default_lineup, join_field_errors, parse_match_date, FieldError, MatchRecord, NewMatch,
    NewTodo, Player, TodoRecord, PLAYERS_PER_MATCH,
};
use crate::records::{Record, RecordCollection, RecordError};

/// Raw user input for one record kind.
pub trait Draft: Default + Clone {
    type Record: Record;

    /// Set one named field, leaving the others untouched.
    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError>;

    /// Field errors; empty means the draft may be submitted.
    fn validate(&self) -> Vec<FieldError>;

    fn to_new(&self) -> Result<<Self::Record as Record>::New, Vec<FieldError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDraft {
    pub match_date: String,
    pub location: String,
    /// Names in display order; the first two play for team A.
    pub players: [String; PLAYERS_PER_MATCH],
    pub score_team_a: String,
    pub score_team_b: String,
}

impl Default for MatchDraft {
    fn default() -> Self {
        let mut players: [String; PLAYERS_PER_MATCH] = Default::default();
        for (slot, player) in players.iter_mut().zip(default_lineup()) {
            *slot = player.name;
        }
        Self {
            match_date: String::new(),
            location: String::new(),
            players,
            score_team_a: String::new(),
            score_team_b: String::new(),
        }
    }
}

impl MatchDraft {
    fn lineup(&self) -> Vec<Player> {
        default_lineup()
            .into_iter()
            .zip(&self.players)
            .map(|(slot, name)| Player::new(name.trim(), slot.team))
            .collect()
    }
}

fn player_slot(name: &str) -> Option<usize> {
    let index = name.strip_prefix("players[")?.strip_suffix(']')?;
    index
        .parse::<usize>()
        .ok()
        .filter(|index| *index < PLAYERS_PER_MATCH)
}

fn parse_score(field: &str, raw: &str) -> Result<Option<i32>, FieldError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<i32>() {
        Ok(score) if score >= 0 => Ok(Some(score)),
        _ => Err(FieldError::invalid(
            field,
            format!("{field} must be a whole number of games, 0 or more"),
        )),
    }
}

impl Draft for MatchDraft {
    type Record = MatchRecord;

    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        let value = value.to_string();
        match name {
            "match_date" => self.match_date = value,
            "location" => self.location = value,
            "score_team_a" => self.score_team_a = value,
            "score_team_b" => self.score_team_b = value,
            _ => {
                let slot = player_slot(name)
                    .ok_or_else(|| FieldError::invalid(name, format!("Unknown field: {name}")))?;
                self.players[slot] = value;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let date = self.match_date.trim();
        if date.is_empty() {
            errors.push(FieldError::required("match_date"));
        } else if parse_match_date(date).is_none() {
            errors.push(FieldError::invalid(
                "match_date",
                format!("Unrecognized date: {date}"),
            ));
        }
        if self.location.trim().is_empty() {
            errors.push(FieldError::required("location"));
        }
        for (index, name) in self.players.iter().enumerate() {
            if name.trim().is_empty() {
                errors.push(FieldError::required(format!("players[{index}]")));
            }
        }
        for (field, raw) in [
            ("score_team_a", &self.score_team_a),
            ("score_team_b", &self.score_team_b),
        ] {
            if let Err(error) = parse_score(field, raw) {
                errors.push(error);
            }
        }
        errors
    }

    fn to_new(&self) -> Result<NewMatch, Vec<FieldError>> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }
        let match_date = parse_match_date(self.match_date.trim())
            .ok_or_else(|| vec![FieldError::required("match_date")])?;
        Ok(NewMatch {
            match_date,
            location: self.location.trim().to_string(),
            players: self.lineup(),
            score_team_a: parse_score("score_team_a", &self.score_team_a).map_err(|e| vec![e])?,
            score_team_b: parse_score("score_team_b", &self.score_team_b).map_err(|e| vec![e])?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoDraft {
    pub title: String,
}

impl Draft for TodoDraft {
    type Record = TodoRecord;

    fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        if name != "title" {
            return Err(FieldError::invalid(name, format!("Unknown field: {name}")));
        }
        self.title = value.to_string();
        Ok(())
    }

    fn validate(&self) -> Vec<FieldError> {
        NewTodo::new(self.title.trim()).validate()
    }

    fn to_new(&self) -> Result<NewTodo, Vec<FieldError>> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(NewTodo::new(self.title.trim()))
        } else {
            Err(errors)
        }
    }
}

/// One modal's worth of input state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState<D: Draft> {
    pub draft: D,
    pub open: bool,
    pub error: Option<String>,
    pub field_errors: Vec<FieldError>,
}

impl<D: Draft> FormState<D> {
    pub fn open(&mut self) {
        self.open = true;
    }

    /// Close and discard the draft.
    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> Result<(), FieldError> {
        self.draft.set_field(name, value)
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        self.draft.validate()
    }

    /// Validate and insert through `collection`.
    ///
    /// Success resets the draft and closes the form. A rejected save keeps
    /// the draft so the user can retry.
    pub async fn submit<B: DataBackend>(
        &mut self,
        collection: &RecordCollection<D::Record, B>,
    ) -> Result<D::Record, RecordError> {
        let new = match self.draft.to_new() {
            Ok(new) => new,
            Err(errors) => {
                self.error = Some(format!("Invalid input: {}", join_field_errors(&errors)));
                self.field_errors.clone_from(&errors);
                return Err(RecordError::Validation(errors));
            }
        };
        self.field_errors.clear();

        match collection.insert(new).await {
            Ok(record) => {
                *self = Self::default();
                Ok(record)
            }
            Err(RecordError::Validation(errors)) => {
                self.error = Some(format!("Invalid input: {}", join_field_errors(&errors)));
                self.field_errors.clone_from(&errors);
                Err(RecordError::Validation(errors))
            }
            Err(error) => {
                self.error = Some(format!("Save failed: {error}"));
                Err(error)
            }
        }
    }
}
