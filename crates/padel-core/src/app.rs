//! Application context and view routing.
//!
//! `App` owns the session store and, while someone is signed in, one
//! `Workspace` with the match and todo collections for that identity. The
//! workspace is torn down and rebuilt whenever the identity changes.

use crate::auth::SessionPersistence;
use crate::backend::{Backend, SupabaseBackend};
use crate::config::{ClientConfig, DEFAULT_MATCHES_TABLE, DEFAULT_TODOS_TABLE};
use crate::models::{Identity, MatchRecord, TodoRecord};
use crate::records::RecordCollection;
use crate::session::{SessionState, SessionStore};

/// Top-level screen to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    InitError(String),
    Loading,
    Auth,
    Main(Identity),
}

impl Screen {
    #[must_use]
    pub fn from_session(state: &SessionState) -> Self {
        match (&state.identity, state.loading) {
            (_, true) => Self::Loading,
            (None, false) => Self::Auth,
            (Some(identity), false) => Self::Main(identity.clone()),
        }
    }
}

/// Collections that belong to one signed-in identity.
pub struct Workspace<B: Backend> {
    pub identity: Identity,
    pub matches: RecordCollection<MatchRecord, B>,
    pub todos: RecordCollection<TodoRecord, B>,
}

impl<B: Backend> Workspace<B> {
    fn open(backend: &B, identity: Identity, tables: &TableNames) -> Self {
        let matches = RecordCollection::with_table(backend.clone(), tables.matches.clone());
        let todos = RecordCollection::with_table(backend.clone(), tables.todos.clone());
        matches.watch();
        todos.watch();
        Self {
            identity,
            matches,
            todos,
        }
    }

    async fn load(&self) {
        let (matches, todos) = tokio::join!(self.matches.fetch(), self.todos.fetch());
        for result in [matches, todos] {
            if let Err(error) = result {
                tracing::warn!("Initial load failed: {}", error);
            }
        }
    }
}

impl<B: Backend> Drop for Workspace<B> {
    fn drop(&mut self) {
        self.matches.teardown();
        self.todos.teardown();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub matches: String,
    pub todos: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            matches: DEFAULT_MATCHES_TABLE.to_string(),
            todos: DEFAULT_TODOS_TABLE.to_string(),
        }
    }
}

impl From<&ClientConfig> for TableNames {
    fn from(config: &ClientConfig) -> Self {
        Self {
            matches: config.matches_table.clone(),
            todos: config.todos_table.clone(),
        }
    }
}

pub struct App<B: Backend> {
    backend: B,
    session: SessionStore<B>,
    tables: TableNames,
    workspace: Option<Workspace<B>>,
}

impl<B: Backend> App<B> {
    /// Start the session store on `backend`. Needs a tokio runtime.
    pub fn start(backend: B, tables: TableNames) -> Self {
        let session = SessionStore::start(backend.clone());
        Self {
            backend,
            session,
            tables,
            workspace: None,
        }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn session(&self) -> &SessionStore<B> {
        &self.session
    }

    #[must_use]
    pub fn screen(&self) -> Screen {
        Screen::from_session(&self.session.snapshot())
    }

    pub const fn workspace(&self) -> Option<&Workspace<B>> {
        self.workspace.as_ref()
    }

    /// Bring the workspace in line with the current identity and return the
    /// screen to show.
    pub async fn sync(&mut self) -> Screen {
        let screen = self.screen();
        let wanted = match &screen {
            Screen::Main(identity) => Some(identity),
            _ => None,
        };
        let current = self.workspace.as_ref().map(|workspace| &workspace.identity);
        if current.map(|identity| &identity.id) == wanted.map(|identity| &identity.id) {
            return screen;
        }

        if let Some(previous) = self.workspace.take() {
            tracing::info!("Closing workspace for {}", previous.identity.email_label());
        }
        if let Some(identity) = wanted {
            tracing::info!("Opening workspace for {}", identity.email_label());
            let workspace = Workspace::open(&self.backend, identity.clone(), &self.tables);
            workspace.load().await;
            self.workspace = Some(workspace);
        }
        screen
    }

    /// Wait for the initial session check, then sync.
    pub async fn ready(&mut self) -> Screen {
        self.session.wait_until_loaded().await;
        self.sync().await
    }
}

/// Outcome of building the application from configuration.
pub enum Startup<B: Backend> {
    Ready(App<B>),
    InitError(String),
}

impl<B: Backend> Startup<B> {
    #[must_use]
    pub fn screen(&self) -> Screen {
        match self {
            Self::Ready(app) => app.screen(),
            Self::InitError(message) => Screen::InitError(message.clone()),
        }
    }
}

impl<S: SessionPersistence> Startup<SupabaseBackend<S>> {
    /// Build the Supabase handle; any failure becomes the init-error screen.
    pub fn connect(config: crate::Result<ClientConfig>, store: S) -> Self {
        let built = config.and_then(|config| {
            SupabaseBackend::new(&config, store).map(|backend| (backend, TableNames::from(&config)))
        });
        match built {
            Ok((backend, tables)) => Self::Ready(App::start(backend, tables)),
            Err(error) => {
                tracing::error!("Failed to initialize client: {}", error);
                Self::InitError(error.to_string())
            }
        }
    }
}
