use std::fmt;

use chrono::Local;
use padel_core::app::{Screen, Startup};
use padel_core::records::{CollectionState, Record, RecordCollection};
use padel_core::session::SessionState;
use tokio::sync::watch;

use crate::commands::common::{format_match_lines, format_todo_lines, start_app, CliBackend};
use crate::error::CliError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchTarget {
    Matches,
    Todos,
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Matches => "matches",
            Self::Todos => "to-dos",
        })
    }
}

/// Redraw one collection on every snapshot until Ctrl-C or sign-out.
pub async fn run_watch(global_profile: Option<&str>, target: WatchTarget) -> Result<(), CliError> {
    let mut app = match start_app(global_profile) {
        Startup::Ready(app) => app,
        Startup::InitError(message) => return Err(CliError::Init(message)),
    };

    match app.ready().await {
        Screen::Main(identity) => {
            println!(
                "Watching {target} for {} (Ctrl-C to stop)",
                identity.email_label()
            );
        }
        Screen::InitError(message) => return Err(CliError::Init(message)),
        Screen::Auth | Screen::Loading => return Err(CliError::NotSignedIn),
    }

    let session = app.session().subscribe();
    let workspace = app.workspace().ok_or(CliError::NotSignedIn)?;
    match target {
        WatchTarget::Matches => watch_collection(&workspace.matches, session, format_match_lines).await,
        WatchTarget::Todos => watch_collection(&workspace.todos, session, format_todo_lines).await,
    }
}

async fn watch_collection<R: Record>(
    collection: &RecordCollection<R, CliBackend>,
    mut session: watch::Receiver<SessionState>,
    render: fn(&[R]) -> Vec<String>,
) -> Result<(), CliError> {
    let mut updates = collection.subscribe();
    let initial = updates.borrow_and_update().clone();
    print_snapshot(&initial, render);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                print_snapshot(&state, render);
            }
            changed = session.changed() => {
                let signed_out = changed.is_err() || session.borrow_and_update().identity.is_none();
                if signed_out {
                    println!("Signed out; stopping.");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn print_snapshot<R>(state: &CollectionState<R>, render: fn(&[R]) -> Vec<String>) {
    if state.loading {
        return;
    }
    println!("--- {} ---", Local::now().format("%H:%M:%S"));
    if let Some(error) = &state.error {
        println!("! {error}");
    }
    if state.records.is_empty() {
        println!("(empty)");
    }
    for line in render(&state.records) {
        println!("{line}");
    }
}
