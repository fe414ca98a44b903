//! Locally detected validation errors.

use serde::Serialize;
use thiserror::Error;

/// A single invalid or missing field, detected before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct FieldError {
    /// Field name as used by `set_field` (e.g. `location`, `players[2]`)
    pub field: String,
    /// Human readable reason
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{field} is required");
        Self { field, message }
    }

    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Render a list of field errors as one display line.
pub fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
