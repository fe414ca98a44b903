//! Todo model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FieldError, RecordId};

/// A row from the `todos` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TodoRecord {
    pub fn apply_patch(&mut self, patch: &TodoPatch) {
        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(is_complete) = patch.is_complete {
            self.is_complete = is_complete;
        }
    }
}

/// Insert payload for a new todo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTodo {
    pub title: String,
    pub is_complete: bool,
}

impl NewTodo {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_complete: false,
        }
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        if self.title.trim().is_empty() {
            vec![FieldError::required("title")]
        } else {
            Vec::new()
        }
    }
}

/// Partial update for an existing todo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl TodoPatch {
    #[must_use]
    pub const fn completion(is_complete: bool) -> Self {
        Self {
            title: None,
            is_complete: Some(is_complete),
        }
    }

    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        if self
            .title
            .as_ref()
            .is_some_and(|title| title.trim().is_empty())
        {
            vec![FieldError::required("title")]
        } else {
            Vec::new()
        }
    }
}
