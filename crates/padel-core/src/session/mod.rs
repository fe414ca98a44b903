//! Session Store: the current identity and the initial-check loading flag.
//!
//! The auth event stream is authoritative. The one-off initial session check
//! only fills in the identity when no event has resolved loading first.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::{AuthBackend, AuthEvent, AuthEventKind, AuthResult, OAuthProvider, SignUpOutcome};
use crate::models::Identity;

/// Published session snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl SessionState {
    const fn initial() -> Self {
        Self {
            identity: None,
            loading: true,
        }
    }
}

pub struct SessionStore<A: AuthBackend> {
    backend: A,
    state: Arc<watch::Sender<SessionState>>,
    listener: JoinHandle<()>,
    initial_check: JoinHandle<()>,
}

impl<A: AuthBackend> SessionStore<A> {
    /// Register the auth listener, then issue the initial session check.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(backend: A) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        let state = Arc::new(state);

        let mut events = backend.on_auth_state_change();
        let listener = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                while let Some(event) = events.recv().await {
                    apply_event(&state, event);
                }
                tracing::debug!("Auth event stream closed");
            }
        });

        let initial_check = tokio::spawn({
            let state = Arc::clone(&state);
            let backend = backend.clone();
            async move {
                let identity = match backend.current_session().await {
                    Ok(identity) => identity,
                    Err(error) => {
                        tracing::warn!("Initial session check failed: {}", error);
                        None
                    }
                };
                resolve_initial(&state, identity);
            }
        });

        Self {
            backend,
            state,
            listener,
            initial_check,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait for loading to resolve and return the identity at that point.
    pub async fn wait_until_loaded(&self) -> Option<Identity> {
        let mut receiver = self.state.subscribe();
        let identity = match receiver.wait_for(|state| !state.loading).await {
            Ok(state) => state.identity.clone(),
            Err(_) => self.identity(),
        };
        identity
    }

    pub const fn backend(&self) -> &A {
        &self.backend
    }

    /// Success shows up as a `SIGNED_IN` event, not in the return value.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<()> {
        self.backend
            .sign_in_with_password(email, password)
            .await
            .map(|_| ())
            .inspect_err(|error| tracing::warn!("Sign-in failed: {}", error))
    }

    /// `ConfirmationRequired` means no session exists until the user follows
    /// the confirmation link.
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        self.backend
            .sign_up(email, password)
            .await
            .inspect_err(|error| tracing::warn!("Sign-up failed: {}", error))
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.backend
            .sign_out()
            .await
            .inspect_err(|error| tracing::warn!("Sign-out failed: {}", error))
    }

    /// Authorization URL to open; the session arrives later as an event.
    pub fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> AuthResult<String> {
        self.backend.sign_in_with_oauth(provider, redirect_to)
    }
}

impl<A: AuthBackend> Drop for SessionStore<A> {
    fn drop(&mut self) {
        self.listener.abort();
        self.initial_check.abort();
    }
}

fn apply_event(state: &watch::Sender<SessionState>, event: AuthEvent) {
    tracing::info!("Auth state change: {}", event.kind);
    state.send_modify(|current| {
        match event.kind {
            AuthEventKind::SignedOut => current.identity = None,
            AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed => {
                if event.identity.is_some() {
                    current.identity = event.identity;
                }
            }
        }
        current.loading = false;
    });
}

fn resolve_initial(state: &watch::Sender<SessionState>, identity: Option<Identity>) {
    let applied = state.send_if_modified(|current| {
        if !current.loading {
            return false;
        }
        current.identity = identity;
        current.loading = false;
        true
    });
    if !applied {
        tracing::debug!("Initial session check resolved after an auth event; ignored");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backend::{MemoryBackend, Operation};

    async fn wait_for(store: &SessionStore<MemoryBackend>, check: impl FnMut(&SessionState) -> bool) {
        let mut receiver = store.subscribe();
        receiver.wait_for(check).await.unwrap();
    }

    #[tokio::test]
    async fn initial_check_resolves_loading_without_identity() {
        let store = SessionStore::start(MemoryBackend::new());
        assert_eq!(store.wait_until_loaded().await, None);
        assert_eq!(
            store.snapshot(),
            SessionState {
                identity: None,
                loading: false
            }
        );
    }

    #[tokio::test]
    async fn initial_check_picks_up_existing_session() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        let store = SessionStore::start(backend);
        let identity = store.wait_until_loaded().await.unwrap();
        assert_eq!(identity.email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn failed_initial_check_resolves_loading_without_identity() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        backend.fail_next(Operation::CurrentSession, "network unreachable");
        let store = SessionStore::start(backend);

        assert_eq!(store.wait_until_loaded().await, None);
        assert!(!store.is_loading());
        assert_eq!(store.identity(), None);
    }

    #[tokio::test]
    async fn first_event_resolves_loading_and_late_check_does_not_clobber() {
        let backend = MemoryBackend::new();
        let gate = backend.hold_next(Operation::CurrentSession);
        backend.fail_next(Operation::CurrentSession, "offline");
        let store = SessionStore::start(backend.clone());
        assert!(store.is_loading());

        let identity = backend.complete_oauth("a@x.com");
        wait_for(&store, |state| !state.loading).await;
        assert_eq!(store.identity(), Some(identity.clone()));

        gate.release();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(store.identity(), Some(identity));
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn sign_in_and_out_are_observed_through_events() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        backend.sign_out().await.unwrap();
        let store = SessionStore::start(backend);
        store.wait_until_loaded().await;

        store.sign_in("a@x.com", "secret1").await.unwrap();
        wait_for(&store, |state| state.identity.is_some()).await;

        store.sign_out().await.unwrap();
        wait_for(&store, |state| state.identity.is_none()).await;
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn errors_are_surfaced_verbatim() {
        let store = SessionStore::start(MemoryBackend::new());
        let error = store.sign_in("a@x.com", "nope-nope").await.unwrap_err();
        assert_eq!(error.to_string(), "Invalid login credentials");
        store.wait_until_loaded().await;
        assert_eq!(store.identity(), None);
    }

    #[tokio::test]
    async fn token_refresh_keeps_identity() {
        let backend = MemoryBackend::new();
        let store = SessionStore::start(backend.clone());
        store.wait_until_loaded().await;
        let identity = Identity::new("u1", "a@x.com");
        backend.push_auth_event(AuthEvent::token_refreshed(identity.clone()));
        wait_for(&store, |state| state.identity.is_some()).await;
        assert_eq!(store.identity(), Some(identity));
    }

    #[tokio::test]
    async fn oauth_returns_provider_url() {
        let store = SessionStore::start(MemoryBackend::new());
        let url = store
            .sign_in_with_oauth(OAuthProvider::Google, Some("padel://callback"))
            .unwrap();
        assert!(url.contains("provider=google"));
        assert!(url.contains("redirect_to=padel%3A%2F%2Fcallback"));
    }

    #[tokio::test]
    async fn dropping_the_store_stops_publishing() {
        let store = SessionStore::start(MemoryBackend::new());
        store.wait_until_loaded().await;
        let mut receiver = store.subscribe();
        drop(store);
        assert!(receiver.changed().await.is_err());
    }
}
