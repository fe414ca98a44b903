//! Data models for Padel Planner

mod field_error;
mod identity;
mod match_record;
mod record_id;
mod todo;

pub use field_error::{join_field_errors, FieldError};
pub use identity::Identity;
pub use match_record::{
    default_lineup, format_match_date, parse_match_date, MatchPatch, MatchRecord, NewMatch,
    Player, Team, PLAYERS_PER_MATCH, PLAYERS_PER_TEAM,
};
pub use record_id::RecordId;
pub use todo::{NewTodo, TodoPatch, TodoRecord};
