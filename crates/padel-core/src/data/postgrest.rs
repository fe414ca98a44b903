//! PostgREST table client.

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    ChangeEvent, ChangeKind, ChangeSubscription, DataError, DataResult, Filter, OrderBy,
};
use crate::auth::AuthError;
use crate::subscription::{Subscription, EVENT_CHANNEL_CAPACITY};
use crate::util::is_http_url;

/// Table-scoped CRUD over `<project>/rest/v1`.
///
/// Writes that succeed through this client are echoed to change listeners.
/// Writes from other clients reach the same listeners through a
/// [`TablePoller`](super::TablePoller) feeding [`change_sender`](Self::change_sender).
#[derive(Clone)]
pub struct PostgrestClient {
    rest_url: String,
    anon_key: String,
    client: Client,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PostgrestClient {
    pub fn new(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        client: Client,
    ) -> DataResult<Self> {
        let rest_url = normalize_rest_url(url.as_ref())?;
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            rest_url,
            anon_key: anon_key.into().trim().to_string(),
            client,
            changes,
        })
    }

    pub async fn select(
        &self,
        bearer: &str,
        table: &str,
        columns: &str,
        order: &OrderBy,
    ) -> DataResult<Vec<Value>> {
        let order = order.to_query_value();
        let request = self.authorized(
            self.client
                .get(self.table_url(table))
                .query(&[("select", columns), ("order", order.as_str())]),
            bearer,
        );
        let response = send_checked(request).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    pub async fn insert(&self, bearer: &str, table: &str, row: Value) -> DataResult<Value> {
        let request = self.authorized(
            self.client
                .post(self.table_url(table))
                .header("Prefer", "return=representation")
                .json(&row),
            bearer,
        );
        let response = send_checked(request).await?;
        let inserted = response
            .json::<Vec<Value>>()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DataError::Api("Insert response did not include a row".to_string()))?;

        self.echo(table, ChangeKind::Insert);
        Ok(inserted)
    }

    pub async fn update(
        &self,
        bearer: &str,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> DataResult<()> {
        let request = self.authorized(
            self.client
                .patch(self.table_url(table))
                .query(&[(filter.column.as_str(), filter.to_query_value())])
                .header("Prefer", "return=minimal")
                .json(&patch),
            bearer,
        );
        send_checked(request).await?;
        self.echo(table, ChangeKind::Update);
        Ok(())
    }

    pub async fn delete(&self, bearer: &str, table: &str, filter: &Filter) -> DataResult<()> {
        let request = self.authorized(
            self.client
                .delete(self.table_url(table))
                .query(&[(filter.column.as_str(), filter.to_query_value())]),
            bearer,
        );
        send_checked(request).await?;
        self.echo(table, ChangeKind::Delete);
        Ok(())
    }

    pub fn subscribe(&self, table: &str) -> ChangeSubscription {
        ChangeSubscription::new(Subscription::new(self.changes.subscribe(), "changes"), table)
    }

    /// Sender shared by every subscription on this client.
    pub fn change_sender(&self) -> broadcast::Sender<ChangeEvent> {
        self.changes.clone()
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, urlencoding::encode(table))
    }

    fn authorized(&self, request: RequestBuilder, bearer: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Accept", "application/json")
            .bearer_auth(bearer)
    }

    fn echo(&self, table: &str, kind: ChangeKind) {
        tracing::debug!("Change on {}: {}", table, kind);
        let _ = self.changes.send(ChangeEvent::new(table, kind));
    }
}

async fn send_checked(request: RequestBuilder) -> DataResult<Response> {
    let response = request.send().await?;
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(DataError::Api(crate::auth::parse_api_error(status, &body)))
}

pub fn normalize_rest_url(url: &str) -> DataResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !is_http_url(trimmed) {
        return Err(DataError::Auth(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        )));
    }
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}
