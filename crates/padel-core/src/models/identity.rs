//! Authenticated user principal

use serde::{Deserialize, Serialize};

/// The signed-in user as reported by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: Some(email.into()),
        }
    }

    /// Email for display, with a placeholder when the provider did not share one.
    #[must_use]
    pub fn email_label(&self) -> &str {
        self.email.as_deref().unwrap_or("(no email)")
    }
}
