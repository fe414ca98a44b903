use std::io;

use padel_core::records::RecordError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] padel_core::Error),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Field(#[from] padel_core::models::FieldError),
    #[error("{0}")]
    Save(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("To-do title cannot be empty")]
    EmptyTitle,
    #[error("No record found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Not signed in. Run `padel auth login --email <email> --password <password>` first.")]
    NotSignedIn,
    #[error("Could not start: {0}")]
    Init(String),
}
