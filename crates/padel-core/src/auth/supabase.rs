//! Supabase (GoTrue) auth client.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};

use super::{
    validate_credentials, AuthBackend, AuthError, AuthEvent, AuthResult, AuthSession,
    AuthSubscription, OAuthProvider, SessionPersistence, SignUpOutcome,
};
use crate::models::Identity;
use crate::subscription::{Subscription, EVENT_CHANNEL_CAPACITY};
use crate::util::{compact_text, is_http_url, unix_timestamp_now};

/// GoTrue client that owns the current session and the auth event stream.
///
/// Clones share the session, the persistence backend and the listeners.
#[derive(Clone)]
pub struct SupabaseAuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
    current: Arc<RwLock<Option<AuthSession>>>,
    events: broadcast::Sender<AuthEvent>,
}

impl<S: SessionPersistence> SupabaseAuthClient<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        Self::with_http_client(url, anon_key, store, Client::builder().build()?)
    }

    /// Build on an existing HTTP client so auth and data calls share a pool.
    pub fn with_http_client(
        url: impl AsRef<str>,
        anon_key: impl Into<String>,
        store: S,
        client: Client,
    ) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Supabase anon key must not be empty",
            ));
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            auth_url,
            anon_key,
            client,
            store,
            current: Arc::new(RwLock::new(None)),
            events,
        })
    }

    /// Restore the persisted session, refreshing it when expired.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        if let Some(session) = self.current.read().await.clone() {
            if !session.is_expired() {
                return Ok(Some(session));
            }
        }

        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.is_expired() {
            *self.current.write().await = Some(stored_session.clone());
            return Ok(Some(stored_session));
        }

        match self.refresh_session(&stored_session.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.forget_session().await?;
                self.emit(AuthEvent::signed_out());
                Ok(None)
            }
        }
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": refresh_token,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "refresh_token")])
                .json(&payload),
        );
        let response = self.send_auth_request(request).await?;
        let session = response.into_session()?.ok_or_else(|| {
            AuthError::Api("Refresh response did not include an active session".to_string())
        })?;

        self.remember_session(&session).await?;
        tracing::debug!("Refreshed session for user {}", session.user.id);
        self.emit(AuthEvent::token_refreshed(session.user.clone()));
        Ok(session)
    }

    /// Bearer token for data requests: the session token when signed in,
    /// otherwise the anon key.
    pub async fn bearer_token(&self) -> AuthResult<String> {
        Ok(self
            .restore_session()
            .await?
            .map_or_else(|| self.anon_key.clone(), |session| session.access_token))
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub fn authorize_url(&self, provider: OAuthProvider, redirect_to: Option<&str>) -> String {
        let mut url = format!("{}/authorize?provider={}", self.auth_url, provider.as_str());
        if let Some(redirect_to) = redirect_to.map(str::trim).filter(|value| !value.is_empty()) {
            url.push_str("&redirect_to=");
            url.push_str(&urlencoding::encode(redirect_to));
        }
        url
    }

    async fn remember_session(&self, session: &AuthSession) -> AuthResult<()> {
        self.store.save_session(session)?;
        *self.current.write().await = Some(session.clone());
        Ok(())
    }

    async fn forget_session(&self) -> AuthResult<()> {
        self.current.write().await.take();
        self.store.clear_session()
    }

    fn emit(&self, event: AuthEvent) {
        tracing::info!("Auth state change: {}", event.kind);
        // No listeners is fine; the next subscriber reads current_session.
        let _ = self.events.send(event);
    }

    fn public_request(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.anon_key))
    }

    async fn send_auth_request(&self, request: RequestBuilder) -> AuthResult<SupabaseAuthResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<SupabaseAuthResponse>().await?)
    }
}

impl<S: SessionPersistence> AuthBackend for SupabaseAuthClient<S> {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/signup", self.auth_url))
                .json(&payload),
        );
        let response = self.send_auth_request(request).await?;
        match response.into_session()? {
            Some(session) => {
                self.remember_session(&session).await?;
                self.emit(AuthEvent::signed_in(session.user.clone()));
                Ok(SignUpOutcome::SignedIn(session.user))
            }
            None => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        validate_credentials(email, password)?;

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        let request = self.public_request(
            self.client
                .post(format!("{}/token", self.auth_url))
                .query(&[("grant_type", "password")])
                .json(&payload),
        );

        let response = self.send_auth_request(request).await?;
        let session = response.into_session()?.ok_or_else(|| {
            AuthError::Api("Sign-in response did not include an active session".to_string())
        })?;

        self.remember_session(&session).await?;
        self.emit(AuthEvent::signed_in(session.user.clone()));
        Ok(session.user)
    }

    fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> AuthResult<String> {
        Ok(self.authorize_url(provider, redirect_to))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let in_memory = self
            .current
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone());
        let access_token = match in_memory {
            Some(token) => Some(token),
            None => self
                .store
                .load_session()?
                .map(|session| session.access_token),
        };

        if let Some(access_token) = access_token {
            let response = self
                .client
                .post(format!("{}/logout", self.auth_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(access_token)
                .send()
                .await?;
            if !(response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED)
            {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(AuthError::Api(parse_api_error(status, &body)));
            }
        }

        self.forget_session().await?;
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    async fn current_session(&self) -> AuthResult<Option<Identity>> {
        Ok(self.restore_session().await?.map(|session| session.user))
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        Subscription::new(self.events.subscribe(), "auth")
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must not be empty",
        ));
    }
    if !is_http_url(trimmed) {
        return Err(AuthError::InvalidConfiguration(
            "Supabase URL must include http:// or https://",
        ));
    }
    if trimmed.ends_with("/auth/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/auth/v1"))
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
    session: Option<SupabaseAuthResponseSession>,
}

impl SupabaseAuthResponse {
    fn into_session(self) -> AuthResult<Option<AuthSession>> {
        let nested_session = self.session;
        let access_token = self.access_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.access_token.clone())
        });
        let refresh_token = self.refresh_token.or_else(|| {
            nested_session
                .as_ref()
                .and_then(|session| session.refresh_token.clone())
        });
        let expires_at = self
            .expires_at
            .or_else(|| {
                nested_session
                    .as_ref()
                    .and_then(|session| session.expires_at)
            })
            .or_else(|| {
                self.expires_in
                    .or_else(|| {
                        nested_session
                            .as_ref()
                            .and_then(|session| session.expires_in)
                    })
                    .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
            });
        let user = self
            .user
            .or_else(|| nested_session.and_then(|session| session.user))
            .map(Into::into);

        match (access_token, refresh_token, expires_at, user) {
            (Some(access_token), Some(refresh_token), Some(expires_at), Some(user)) => {
                Ok(Some(AuthSession {
                    access_token,
                    refresh_token,
                    expires_at,
                    user,
                }))
            }
            (None, None, None, Some(_)) => Ok(None),
            _ => Err(AuthError::Api(
                "Auth response did not include enough session fields".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseAuthResponseSession {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SupabaseUser>,
}

#[derive(Debug, Deserialize)]
struct SupabaseUser {
    id: String,
    email: Option<String>,
}

impl From<SupabaseUser> for Identity {
    fn from(value: SupabaseUser) -> Self {
        Self {
            id: value.id,
            email: value.email,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupabaseErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
    msg: Option<String>,
}

pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SupabaseErrorResponse>(body) {
        if let Some(message) = payload
            .message
            .or(payload.msg)
            .or(payload.error_description)
            .or(payload.error)
        {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let compact = compact_text(body);
    if compact.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionPersistence;

    fn client() -> SupabaseAuthClient<MemorySessionPersistence> {
        SupabaseAuthClient::new(
            "https://demo.supabase.co",
            "anon",
            MemorySessionPersistence::default(),
        )
        .unwrap()
    }

    #[test]
    fn normalize_auth_url_appends_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn normalize_auth_url_keeps_existing_auth_path() {
        let normalized = normalize_auth_url("https://demo.supabase.co/auth/v1/").unwrap();
        assert_eq!(normalized, "https://demo.supabase.co/auth/v1");
    }

    #[test]
    fn new_rejects_blank_anon_key() {
        let result = SupabaseAuthClient::new(
            "https://demo.supabase.co",
            "  ",
            MemorySessionPersistence::default(),
        );
        assert!(matches!(result, Err(AuthError::InvalidConfiguration(_))));
    }

    #[test]
    fn response_without_session_fields_means_confirmation_required() {
        let response = SupabaseAuthResponse {
            access_token: None,
            refresh_token: None,
            expires_at: None,
            expires_in: None,
            user: Some(SupabaseUser {
                id: "user".to_string(),
                email: Some("a@x.com".to_string()),
            }),
            session: None,
        };
        assert!(response.into_session().unwrap().is_none());
    }

    #[test]
    fn nested_session_fields_are_accepted() {
        let payload = r#"{
            "user": {"id": "u1", "email": "a@x.com"},
            "session": {"access_token": "at", "refresh_token": "rt", "expires_in": 3600}
        }"#;
        let response: SupabaseAuthResponse = serde_json::from_str(payload).unwrap();
        let session = response.into_session().unwrap().unwrap();
        assert_eq!(session.user, Identity::new("u1", "a@x.com"));
        assert!(!session.is_expired());
    }

    #[test]
    fn authorize_url_encodes_redirect() {
        let url = client().authorize_url(OAuthProvider::Google, Some("http://localhost:3000/cb"));
        assert_eq!(
            url,
            "https://demo.supabase.co/auth/v1/authorize?provider=google&redirect_to=http%3A%2F%2Flocalhost%3A3000%2Fcb"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_fields() {
        let message = parse_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": "invalid_grant", "error_description": "Invalid login credentials"}"#,
        );
        assert_eq!(message, "Invalid login credentials (400)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[tokio::test]
    async fn sign_out_without_session_emits_signed_out() {
        let client = client();
        let mut listener = client.on_auth_state_change();
        client.sign_out().await.unwrap();
        let event = listener.recv().await.unwrap();
        assert_eq!(event, AuthEvent::signed_out());
    }

    #[tokio::test]
    async fn bearer_token_falls_back_to_anon_key() {
        assert_eq!(client().bearer_token().await.unwrap(), "anon");
    }

    #[tokio::test]
    async fn restore_session_uses_unexpired_persisted_session() {
        let store = MemorySessionPersistence::default();
        store
            .save_session(&AuthSession {
                access_token: "at".to_string(),
                refresh_token: "rt".to_string(),
                expires_at: unix_timestamp_now() + 3600,
                user: Identity::new("u1", "a@x.com"),
            })
            .unwrap();
        let client = SupabaseAuthClient::new("https://demo.supabase.co", "anon", store).unwrap();
        let identity = client.current_session().await.unwrap().unwrap();
        assert_eq!(identity.id, "u1");
        assert_eq!(client.bearer_token().await.unwrap(), "at");
    }
}
