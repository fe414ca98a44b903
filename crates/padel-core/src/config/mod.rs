//! Client configuration.
//!
//! Provides a `ClientConfig` used by every front end to locate the Supabase
//! project and the two record tables. Values are public, safe-to-ship
//! endpoints/keys; secret credentials must never be stored here.

use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_MATCHES_TABLE: &str = "matches";
pub const DEFAULT_TODOS_TABLE: &str = "todos";
/// How often a watched table is re-read to detect changes made elsewhere.
pub const DEFAULT_CHANGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Supabase is not configured: set both SUPABASE_URL and SUPABASE_ANON_KEY")]
    Incomplete,
    #[error("Config field '{0}' is required")]
    Missing(&'static str),
    #[error("Config field '{0}' must include http:// or https://")]
    InvalidUrl(&'static str),
}

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub matches_table: String,
    pub todos_table: String,
    pub change_poll_interval: Duration,
}

impl ClientConfig {
    /// Build a config, trimming values and checking the URL scheme.
    pub fn new(
        supabase_url: impl Into<String>,
        supabase_anon_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let supabase_url = normalize_text_option(Some(supabase_url.into()))
            .ok_or(ConfigError::Missing("supabase_url"))?;
        if !is_http_url(&supabase_url) {
            return Err(ConfigError::InvalidUrl("supabase_url"));
        }
        let supabase_anon_key = normalize_text_option(Some(supabase_anon_key.into()))
            .ok_or(ConfigError::Missing("supabase_anon_key"))?;

        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
            matches_table: DEFAULT_MATCHES_TABLE.to_string(),
            todos_table: DEFAULT_TODOS_TABLE.to_string(),
            change_poll_interval: DEFAULT_CHANGE_POLL_INTERVAL,
        })
    }

    /// Override the change poll interval; zero is raised to one second.
    #[must_use]
    pub fn with_change_poll_interval(mut self, interval: Duration) -> Self {
        self.change_poll_interval = if interval.is_zero() {
            Duration::from_secs(1)
        } else {
            interval
        };
        self
    }

    /// Resolve from `SUPABASE_URL` / `SUPABASE_ANON_KEY`.
    ///
    /// Returns `Ok(None)` when neither variable is set.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::resolve_optional(
            std::env::var(SUPABASE_URL_ENV).ok(),
            std::env::var(SUPABASE_ANON_KEY_ENV).ok(),
        )
    }

    /// Both-or-neither resolution of optional values.
    pub fn resolve_optional(
        url: Option<String>,
        anon_key: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        match (normalize_text_option(url), normalize_text_option(anon_key)) {
            (None, None) => Ok(None),
            (Some(url), Some(anon_key)) => Self::new(url, anon_key).map(Some),
            _ => Err(ConfigError::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_trailing_slash() {
        let config = ClientConfig::new(" https://demo.supabase.co/ ", " anon ").unwrap();
        assert_eq!(config.supabase_url, "https://demo.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon");
        assert_eq!(config.matches_table, "matches");
        assert_eq!(config.todos_table, "todos");
        assert_eq!(config.change_poll_interval, DEFAULT_CHANGE_POLL_INTERVAL);
    }

    #[test]
    fn change_poll_interval_is_never_zero() {
        let config = ClientConfig::new("https://demo.supabase.co", "anon").unwrap();
        let fast = config
            .clone()
            .with_change_poll_interval(Duration::from_millis(250));
        assert_eq!(fast.change_poll_interval, Duration::from_millis(250));
        let zero = config.with_change_poll_interval(Duration::ZERO);
        assert_eq!(zero.change_poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn new_rejects_missing_scheme() {
        assert_eq!(
            ClientConfig::new("demo.supabase.co", "anon").unwrap_err(),
            ConfigError::InvalidUrl("supabase_url")
        );
    }

    #[test]
    fn resolve_optional_is_both_or_neither() {
        assert_eq!(ClientConfig::resolve_optional(None, None).unwrap(), None);
        assert_eq!(
            ClientConfig::resolve_optional(Some("https://demo.supabase.co".into()), None)
                .unwrap_err(),
            ConfigError::Incomplete
        );
        assert!(ClientConfig::resolve_optional(
            Some("https://demo.supabase.co".into()),
            Some("anon".into())
        )
        .unwrap()
        .is_some());
    }
}
