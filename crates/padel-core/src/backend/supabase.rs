//! Supabase-backed collaborator handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::auth::{
    AuthBackend, AuthResult, AuthSubscription, MemorySessionPersistence, OAuthProvider,
    SessionPersistence, SignUpOutcome, SupabaseAuthClient,
};
use crate::config::ClientConfig;
use crate::data::{
    ChangeSubscription, DataBackend, DataResult, Filter, OrderBy, PostgrestClient, TablePoller,
};
use crate::models::Identity;
use crate::Result;

/// GoTrue auth and PostgREST data sharing one HTTP pool and one session.
///
/// Change subscriptions are fed by this handle's own writes and by one table
/// poller per watched table, shared between clones and stopped once the last
/// subscription on that table is dropped.
#[derive(Clone)]
pub struct SupabaseBackend<S: SessionPersistence = MemorySessionPersistence> {
    auth: SupabaseAuthClient<S>,
    rest: PostgrestClient,
    pollers: Arc<Mutex<HashMap<String, Weak<TablePoller>>>>,
    poll_interval: Duration,
}

impl SupabaseBackend<MemorySessionPersistence> {
    /// Handle whose session lives only as long as the process.
    pub fn in_memory(config: &ClientConfig) -> Result<Self> {
        Self::new(config, MemorySessionPersistence::default())
    }
}

impl<S: SessionPersistence> SupabaseBackend<S> {
    pub fn new(config: &ClientConfig, store: S) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(crate::auth::AuthError::from)?;
        let auth = SupabaseAuthClient::with_http_client(
            &config.supabase_url,
            config.supabase_anon_key.clone(),
            store,
            client.clone(),
        )?;
        let rest = PostgrestClient::new(&config.supabase_url, &config.supabase_anon_key, client)?;
        tracing::debug!("Supabase backend ready for {}", config.supabase_url);
        Ok(Self {
            auth,
            rest,
            pollers: Arc::default(),
            poll_interval: config.change_poll_interval,
        })
    }

    pub const fn auth_client(&self) -> &SupabaseAuthClient<S> {
        &self.auth
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn poller_for(&self, table: &str) -> Arc<TablePoller> {
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        pollers.retain(|_, poller| poller.strong_count() > 0);
        if let Some(poller) = pollers.get(table).and_then(Weak::upgrade) {
            return poller;
        }
        let poller = Arc::new(TablePoller::spawn(
            self.clone(),
            table,
            self.poll_interval,
            self.rest.change_sender(),
        ));
        pollers.insert(table.to_string(), Arc::downgrade(&poller));
        poller
    }
}

impl<S: SessionPersistence> AuthBackend for SupabaseBackend<S> {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        self.auth.sign_up(email, password).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        self.auth.sign_in_with_password(email, password).await
    }

    fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> AuthResult<String> {
        self.auth.sign_in_with_oauth(provider, redirect_to)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.auth.sign_out().await
    }

    async fn current_session(&self) -> AuthResult<Option<Identity>> {
        self.auth.current_session().await
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.auth.on_auth_state_change()
    }
}

impl<S: SessionPersistence> DataBackend for SupabaseBackend<S> {
    async fn select(&self, table: &str, columns: &str, order: &OrderBy) -> DataResult<Vec<Value>> {
        let bearer = self.auth.bearer_token().await?;
        self.rest.select(&bearer, table, columns, order).await
    }

    async fn insert(&self, table: &str, row: Value) -> DataResult<Value> {
        let bearer = self.auth.bearer_token().await?;
        self.rest.insert(&bearer, table, row).await
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> DataResult<()> {
        let bearer = self.auth.bearer_token().await?;
        self.rest.update(&bearer, table, filter, patch).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> DataResult<()> {
        let bearer = self.auth.bearer_token().await?;
        self.rest.delete(&bearer, table, filter).await
    }

    fn subscribe_to_changes(&self, table: &str) -> ChangeSubscription {
        self.rest.subscribe(table).with_poller(self.poller_for(table))
    }
}
