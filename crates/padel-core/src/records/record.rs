//! Record kinds a collection can hold.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{DEFAULT_MATCHES_TABLE, DEFAULT_TODOS_TABLE};
use crate::models::{
    FieldError, MatchPatch, MatchRecord, NewMatch, NewTodo, RecordId, TodoPatch, TodoRecord,
};

/// A row type backed by one remote table, kept newest-first by its order column.
pub trait Record: Clone + Debug + PartialEq + DeserializeOwned + Send + Sync + 'static {
    /// Insert payload.
    type New: Serialize + Send + Sync;
    /// Partial update payload.
    type Patch: Serialize + Send + Sync;

    /// Label used in log lines.
    const KIND: &'static str;
    const DEFAULT_TABLE: &'static str;
    const COLUMNS: &'static str = "*";
    const ORDER_COLUMN: &'static str;

    fn id(&self) -> &RecordId;

    /// Value of the order column; absent values sort last.
    fn order_key(&self) -> Option<DateTime<Utc>>;

    fn apply_patch(&mut self, patch: &Self::Patch);

    fn validate_new(new: &Self::New) -> Vec<FieldError>;

    fn validate_patch(patch: &Self::Patch) -> Vec<FieldError>;
}

impl Record for MatchRecord {
    type New = NewMatch;
    type Patch = MatchPatch;

    const KIND: &'static str = "match";
    const DEFAULT_TABLE: &'static str = DEFAULT_MATCHES_TABLE;
    const COLUMNS: &'static str = "id,match_date,location,players,score_team_a,score_team_b";
    const ORDER_COLUMN: &'static str = "match_date";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn order_key(&self) -> Option<DateTime<Utc>> {
        Some(self.match_date)
    }

    fn apply_patch(&mut self, patch: &MatchPatch) {
        Self::apply_patch(self, patch);
    }

    fn validate_new(new: &NewMatch) -> Vec<FieldError> {
        new.validate()
    }

    fn validate_patch(patch: &MatchPatch) -> Vec<FieldError> {
        patch.validate()
    }
}

impl Record for TodoRecord {
    type New = NewTodo;
    type Patch = TodoPatch;

    const KIND: &'static str = "todo";
    const DEFAULT_TABLE: &'static str = DEFAULT_TODOS_TABLE;
    const ORDER_COLUMN: &'static str = "created_at";

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn order_key(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn apply_patch(&mut self, patch: &TodoPatch) {
        Self::apply_patch(self, patch);
    }

    fn validate_new(new: &NewTodo) -> Vec<FieldError> {
        new.validate()
    }

    fn validate_patch(patch: &TodoPatch) -> Vec<FieldError> {
        patch.validate()
    }
}

/// Index at which `record` belongs in a newest-first list. Ties go first.
pub(crate) fn splice_position<R: Record>(records: &[R], record: &R) -> usize {
    let key = record.order_key();
    records
        .iter()
        .position(|existing| existing.order_key() <= key)
        .unwrap_or(records.len())
}

/// Stable newest-first sort.
pub(crate) fn sort_newest_first<R: Record>(records: &mut [R]) {
    records.sort_by(|left, right| right.order_key().cmp(&left.order_key()));
}
