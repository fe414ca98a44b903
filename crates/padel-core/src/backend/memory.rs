//! In-process backend for tests, demos and offline runs.
//!
//! One `MemoryBackend::new()` is one server: a user registry and a set of
//! tables. `connect()` opens another client on the same server with its own
//! session, so tests can play a second device writing concurrently.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::auth::{
    validate_credentials, AuthBackend, AuthError, AuthEvent, AuthEventKind, AuthResult,
    AuthSubscription, OAuthProvider, SignUpOutcome,
};
use crate::data::{
    ChangeEvent, ChangeKind, ChangeSubscription, DataBackend, DataError, DataResult, Filter,
    OrderBy,
};
use crate::models::Identity;
use crate::subscription::{Subscription, EVENT_CHANNEL_CAPACITY};

const MIN_PASSWORD_LENGTH: usize = 6;

/// Collaborator calls that can be failed or held in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignUp,
    SignIn,
    SignOut,
    CurrentSession,
    Select,
    Insert,
    Update,
    Delete,
}

/// Held call; the call completes once the gate is released or dropped.
#[derive(Debug)]
pub struct Gate {
    release: oneshot::Sender<()>,
}

impl Gate {
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

#[derive(Debug)]
struct StoredUser {
    identity: Identity,
    password: String,
}

#[derive(Debug, Clone)]
struct StoredRow {
    seq: u64,
    owner: String,
    row: Value,
}

#[derive(Debug, Default)]
struct ServerState {
    users: HashMap<String, StoredUser>,
    tables: HashMap<String, Vec<StoredRow>>,
    next_seq: u64,
    require_confirmation: bool,
}

#[derive(Debug)]
struct Server {
    state: Mutex<ServerState>,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Debug, Default)]
struct ClientState {
    session: Option<Identity>,
    failures: HashMap<Operation, VecDeque<String>>,
    gates: HashMap<Operation, VecDeque<oneshot::Receiver<()>>>,
}

/// Auth and data collaborator held entirely in memory.
///
/// Rows are visible only to the user who inserted them, mirroring the
/// per-user access policy of the hosted tables.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    server: Arc<Server>,
    client: Arc<Mutex<ClientState>>,
    auth_events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let server = Arc::new(Server {
            state: Mutex::new(ServerState::default()),
            changes,
        });
        Self::attach(server)
    }

    /// Another signed-out client on the same server.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self::attach(Arc::clone(&self.server))
    }

    fn attach(server: Arc<Server>) -> Self {
        let (auth_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            server,
            client: Arc::new(Mutex::new(ClientState::default())),
            auth_events,
        }
    }

    /// When set, sign-up leaves the account unconfirmed and returns no session.
    pub fn require_email_confirmation(&self, required: bool) {
        self.server_state().require_confirmation = required;
    }

    /// Fail the next call of `operation` with `message`.
    pub fn fail_next(&self, operation: Operation, message: impl Into<String>) {
        self.client_state()
            .failures
            .entry(operation)
            .or_default()
            .push_back(message.into());
    }

    /// Hold the next call of `operation` until the returned gate is released.
    ///
    /// A held `select` has already read its rows, so it answers with the
    /// table as it was when the call was made.
    #[must_use]
    pub fn hold_next(&self, operation: Operation) -> Gate {
        let (release, wait) = oneshot::channel();
        self.client_state()
            .gates
            .entry(operation)
            .or_default()
            .push_back(wait);
        Gate { release }
    }

    /// Push an auth event to this client's listeners, as a token refresh or an
    /// OAuth redirect completing out-of-band would.
    pub fn push_auth_event(&self, event: AuthEvent) {
        self.client_state().session = match event.kind {
            AuthEventKind::SignedOut => None,
            _ => event.identity.clone(),
        };
        self.emit_auth(event);
    }

    /// Complete an OAuth sign-in for `email`, creating the account if needed.
    pub fn complete_oauth(&self, email: &str) -> Identity {
        let identity = {
            let mut state = self.server_state();
            state
                .users
                .entry(email.trim().to_lowercase())
                .or_insert_with(|| StoredUser {
                    identity: Identity::new(Uuid::new_v4().to_string(), email.trim()),
                    password: String::new(),
                })
                .identity
                .clone()
        };
        self.client_state().session = Some(identity.clone());
        self.emit_auth(AuthEvent::signed_in(identity.clone()));
        identity
    }

    /// Rows of `table` owned by anyone, oldest first.
    #[must_use]
    pub fn table_rows(&self, table: &str) -> Vec<Value> {
        self.server_state()
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|stored| stored.row.clone()).collect())
            .unwrap_or_default()
    }

    fn server_state(&self) -> MutexGuard<'_, ServerState> {
        self.server
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn client_state(&self) -> MutexGuard<'_, ClientState> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self, operation: Operation) -> Option<String> {
        self.client_state()
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
    }

    async fn pass_gate(&self, operation: Operation) {
        let gate = self
            .client_state()
            .gates
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        if let Some(wait) = gate {
            let _ = wait.await;
        }
    }

    fn signed_in_user(&self) -> Option<Identity> {
        self.client_state().session.clone()
    }

    fn emit_auth(&self, event: AuthEvent) {
        tracing::debug!("Memory auth event: {}", event.kind);
        let _ = self.auth_events.send(event);
    }

    fn emit_change(&self, table: &str, kind: ChangeKind) {
        let _ = self.server.changes.send(ChangeEvent::new(table, kind));
    }

    fn auth_failure(&self, operation: Operation) -> AuthResult<()> {
        self.take_failure(operation)
            .map_or(Ok(()), |message| Err(AuthError::Api(message)))
    }

    fn data_failure(&self, operation: Operation) -> DataResult<()> {
        self.take_failure(operation)
            .map_or(Ok(()), |message| Err(DataError::Api(message)))
    }
}

impl AuthBackend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        self.pass_gate(Operation::SignUp).await;
        self.auth_failure(Operation::SignUp)?;
        validate_credentials(email, password)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::Api(format!(
                "Password should be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let key = email.trim().to_lowercase();
        let (identity, require_confirmation) = {
            let mut state = self.server_state();
            if state.users.contains_key(&key) {
                return Err(AuthError::Api("User already registered".to_string()));
            }
            let identity = Identity::new(Uuid::new_v4().to_string(), email.trim());
            state.users.insert(
                key,
                StoredUser {
                    identity: identity.clone(),
                    password: password.to_string(),
                },
            );
            (identity, state.require_confirmation)
        };

        if require_confirmation {
            return Ok(SignUpOutcome::ConfirmationRequired);
        }
        self.client_state().session = Some(identity.clone());
        self.emit_auth(AuthEvent::signed_in(identity.clone()));
        Ok(SignUpOutcome::SignedIn(identity))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Identity> {
        self.pass_gate(Operation::SignIn).await;
        self.auth_failure(Operation::SignIn)?;
        validate_credentials(email, password)?;

        let identity = {
            let state = self.server_state();
            state
                .users
                .get(&email.trim().to_lowercase())
                .filter(|user| !user.password.is_empty() && user.password == password)
                .map(|user| user.identity.clone())
                .ok_or_else(|| AuthError::Api("Invalid login credentials".to_string()))?
        };
        self.client_state().session = Some(identity.clone());
        self.emit_auth(AuthEvent::signed_in(identity.clone()));
        Ok(identity)
    }

    fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: Option<&str>,
    ) -> AuthResult<String> {
        let mut url = format!("memory://authorize?provider={provider}");
        if let Some(redirect_to) = redirect_to.map(str::trim).filter(|value| !value.is_empty()) {
            url.push_str("&redirect_to=");
            url.push_str(&urlencoding::encode(redirect_to));
        }
        Ok(url)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.pass_gate(Operation::SignOut).await;
        self.auth_failure(Operation::SignOut)?;
        self.client_state().session = None;
        self.emit_auth(AuthEvent::signed_out());
        Ok(())
    }

    async fn current_session(&self) -> AuthResult<Option<Identity>> {
        self.pass_gate(Operation::CurrentSession).await;
        self.auth_failure(Operation::CurrentSession)?;
        Ok(self.signed_in_user())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        Subscription::new(self.auth_events.subscribe(), "auth")
    }
}

impl DataBackend for MemoryBackend {
    async fn select(&self, table: &str, columns: &str, order: &OrderBy) -> DataResult<Vec<Value>> {
        let failure = self.data_failure(Operation::Select);
        let viewer = self.signed_in_user();
        let mut rows: Vec<StoredRow> = viewer
            .as_ref()
            .map(|viewer| {
                self.server_state()
                    .tables
                    .get(table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|stored| stored.owner == viewer.id)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        self.pass_gate(Operation::Select).await;
        failure?;

        rows.sort_by(|left, right| {
            let by_column = compare_column(&left.row, &right.row, &order.column);
            let by_column = if order.ascending {
                by_column
            } else {
                by_column.reverse()
            };
            by_column.then_with(|| right.seq.cmp(&left.seq))
        });
        Ok(rows
            .into_iter()
            .map(|stored| project(stored.row, columns))
            .collect())
    }

    async fn insert(&self, table: &str, row: Value) -> DataResult<Value> {
        self.pass_gate(Operation::Insert).await;
        self.data_failure(Operation::Insert)?;
        let owner = self.signed_in_user().ok_or_else(|| {
            DataError::Api("new row violates row-level security policy".to_string())
        })?;
        let Value::Object(mut fields) = row else {
            return Err(DataError::Api("Insert payload must be a JSON object".to_string()));
        };
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields.entry("created_at").or_insert_with(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        });
        let stored = Value::Object(fields);

        {
            let mut state = self.server_state();
            state.next_seq += 1;
            let seq = state.next_seq;
            state
                .tables
                .entry(table.to_string())
                .or_default()
                .push(StoredRow {
                    seq,
                    owner: owner.id,
                    row: stored.clone(),
                });
        }
        self.emit_change(table, ChangeKind::Insert);
        Ok(stored)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Value) -> DataResult<()> {
        self.pass_gate(Operation::Update).await;
        self.data_failure(Operation::Update)?;
        let Value::Object(patch) = patch else {
            return Err(DataError::Api("Update payload must be a JSON object".to_string()));
        };
        let viewer = self.signed_in_user().map(|identity| identity.id);

        let touched = {
            let mut state = self.server_state();
            let mut touched = 0_usize;
            for stored in state.tables.entry(table.to_string()).or_default() {
                if Some(&stored.owner) != viewer.as_ref() || !filter.matches(&stored.row) {
                    continue;
                }
                if let Value::Object(fields) = &mut stored.row {
                    merge(fields, &patch);
                    touched += 1;
                }
            }
            touched
        };
        if touched > 0 {
            self.emit_change(table, ChangeKind::Update);
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> DataResult<()> {
        self.pass_gate(Operation::Delete).await;
        self.data_failure(Operation::Delete)?;
        let viewer = self.signed_in_user().map(|identity| identity.id);

        let removed = {
            let mut state = self.server_state();
            let rows = state.tables.entry(table.to_string()).or_default();
            let before = rows.len();
            rows.retain(|stored| {
                Some(&stored.owner) != viewer.as_ref() || !filter.matches(&stored.row)
            });
            before - rows.len()
        };
        if removed > 0 {
            self.emit_change(table, ChangeKind::Delete);
        }
        Ok(())
    }

    fn subscribe_to_changes(&self, table: &str) -> ChangeSubscription {
        ChangeSubscription::new(
            Subscription::new(self.server.changes.subscribe(), "changes"),
            table,
        )
    }
}

fn merge(fields: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        fields.insert(key.clone(), value.clone());
    }
}

fn project(row: Value, columns: &str) -> Value {
    let columns = columns.trim();
    if columns.is_empty() || columns == "*" {
        return row;
    }
    let Value::Object(fields) = row else {
        return row;
    };
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    Value::Object(
        fields
            .into_iter()
            .filter(|(key, _)| wanted.contains(&key.as_str()))
            .collect(),
    )
}

/// Missing and null sort lowest; strings compare lexically, which orders
/// RFC 3339 timestamps in the same zone chronologically.
fn compare_column(left: &Value, right: &Value, column: &str) -> Ordering {
    match (left.get(column), right.get(column)) {
        (Some(Value::String(left)), Some(Value::String(right))) => left.cmp(right),
        (Some(Value::Number(left)), Some(Value::Number(right))) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(left)), Some(Value::Bool(right))) => left.cmp(right),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
