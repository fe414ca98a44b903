//! Error types for padel-core

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::data::DataError;
use crate::records::RecordError;

/// Result type alias using padel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in padel-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Auth collaborator error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Data collaborator error
    #[error(transparent)]
    Data(#[from] DataError),

    /// Record collection error
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Client configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_errors_convert_transparently() {
        let error = Error::from(ConfigError::Incomplete);
        assert!(matches!(error, Error::Config(_)));
        assert_eq!(error.to_string(), ConfigError::Incomplete.to_string());

        let error = Error::from(RecordError::Rejected("insert refused".to_string()));
        assert_eq!(error.to_string(), "insert refused");
    }
}
