//! Data collaborator seam: table-scoped CRUD plus change notifications.

mod poll;
mod postgrest;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::AuthError;
use crate::subscription::Subscription;

pub use poll::TablePoller;
pub use postgrest::PostgrestClient;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Api(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type DataResult<T> = Result<T, DataError>;

/// What happened to a row. Listeners in this crate ignore it and refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    #[must_use]
    pub fn new(table: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            table: table.into(),
            kind,
        }
    }
}

/// Registration for "any change" on one table.
#[derive(Debug)]
pub struct ChangeSubscription {
    inner: Subscription<ChangeEvent>,
    table: String,
    poller: Option<Arc<TablePoller>>,
}

impl ChangeSubscription {
    #[must_use]
    pub fn new(inner: Subscription<ChangeEvent>, table: impl Into<String>) -> Self {
        Self {
            inner,
            table: table.into(),
            poller: None,
        }
    }

    /// Keep `poller` running for as long as this subscription lives.
    #[must_use]
    pub fn with_poller(mut self, poller: Arc<TablePoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    #[must_use]
    pub fn is_polled(&self) -> bool {
        self.poller.is_some()
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next change on the watched table, or `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            let event = self.inner.recv().await?;
            if event.table == self.table {
                return Some(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        while let Some(event) = self.inner.try_recv() {
            if event.table == self.table {
                return Some(event);
            }
        }
        None
    }
}

/// Sort order for `select`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    /// PostgREST `order=` value, e.g. `match_date.desc`
    #[must_use]
    pub fn to_query_value(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{direction}", self.column)
    }
}

/// Equality filter selecting the rows an update/delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// PostgREST filter value, e.g. `eq.42`
    #[must_use]
    pub fn to_query_value(&self) -> String {
        format!("eq.{}", self.value)
    }

    /// Whether a JSON row satisfies the filter. Numbers compare by text.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.column) {
            Some(Value::String(text)) => *text == self.value,
            Some(Value::Number(number)) => number.to_string() == self.value,
            Some(Value::Bool(flag)) => flag.to_string() == self.value,
            _ => false,
        }
    }
}

/// Capability set of the external data service.
///
/// Rows cross this seam as JSON objects; typed decoding happens in the
/// record collection. Access scoping (which rows are visible) is the
/// service's policy, never filtered here.
pub trait DataBackend: Clone + Send + Sync + 'static {
    fn select(
        &self,
        table: &str,
        columns: &str,
        order: &OrderBy,
    ) -> impl Future<Output = DataResult<Vec<Value>>> + Send;

    /// Insert one row and return it as stored (with generated columns).
    fn insert(&self, table: &str, row: Value) -> impl Future<Output = DataResult<Value>> + Send;

    fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> impl Future<Output = DataResult<()>> + Send;

    fn delete(&self, table: &str, filter: &Filter) -> impl Future<Output = DataResult<()>> + Send;

    fn subscribe_to_changes(&self, table: &str) -> ChangeSubscription;
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;

    #[test]
    fn order_and_filter_render_postgrest_values() {
        assert_eq!(OrderBy::desc("match_date").to_query_value(), "match_date.desc");
        assert_eq!(OrderBy::asc("title").to_query_value(), "title.asc");
        assert_eq!(Filter::eq("id", "42").to_query_value(), "eq.42");
    }

    #[test]
    fn filter_matches_string_and_numeric_ids() {
        let filter = Filter::eq("id", "42");
        assert!(filter.matches(&json!({"id": 42})));
        assert!(filter.matches(&json!({"id": "42"})));
        assert!(!filter.matches(&json!({"id": "43"})));
        assert!(!filter.matches(&json!({"title": "42"})));
    }

    #[tokio::test]
    async fn change_subscription_ignores_other_tables() {
        let (sender, receiver) = broadcast::channel(8);
        let mut subscription =
            ChangeSubscription::new(Subscription::new(receiver, "changes"), "matches");
        sender.send(ChangeEvent::new("todos", ChangeKind::Insert)).unwrap();
        sender.send(ChangeEvent::new("matches", ChangeKind::Delete)).unwrap();
        let event = subscription.recv().await.unwrap();
        assert_eq!(event, ChangeEvent::new("matches", ChangeKind::Delete));
    }
}
