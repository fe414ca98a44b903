//! End-to-end scenarios against the in-memory backend.

use chrono::{TimeZone, Utc};
use padel_core::app::{App, Screen, TableNames};
use padel_core::auth::{AuthBackend, SignUpOutcome};
use padel_core::backend::{MemoryBackend, Operation};
use padel_core::form::{FormState, MatchDraft};
use padel_core::models::{NewMatch, NewTodo};
use padel_core::records::{RecordCollection, RecordError};
use padel_core::session::SessionStore;
use padel_core::{MatchRecord, TodoRecord};
use pretty_assertions::assert_eq;

async fn signed_in_backend(email: &str) -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.sign_up(email, "secret1").await.unwrap();
    backend
}

#[tokio::test]
async fn sign_up_then_first_match_lands_in_the_collection() {
    let backend = MemoryBackend::new();
    let session = SessionStore::start(backend.clone());
    assert_eq!(session.wait_until_loaded().await, None);

    let outcome = session.sign_up("a@x.com", "secret1").await.unwrap();
    assert!(matches!(outcome, SignUpOutcome::SignedIn(_)));
    let mut receiver = session.subscribe();
    let identity = receiver
        .wait_for(|state| state.identity.is_some())
        .await
        .unwrap()
        .identity
        .clone()
        .unwrap();
    assert_eq!(identity.email.as_deref(), Some("a@x.com"));

    let matches = RecordCollection::<MatchRecord, _>::new(backend.clone());
    matches.fetch().await.unwrap();
    assert!(matches.records().is_empty());

    let mut form = FormState::<MatchDraft>::default();
    form.open();
    form.set_field("match_date", "2024-01-02T18:00").unwrap();
    form.set_field("location", "Padel Club Milano").unwrap();
    let inserted = form.submit(&matches).await.unwrap();
    assert!(!form.open);

    matches.fetch().await.unwrap();
    let records = matches.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0], inserted);
    assert!(!records[0].id.as_str().is_empty());
}

#[tokio::test]
async fn matches_fetch_newest_first() {
    let backend = signed_in_backend("a@x.com").await;
    let matches = RecordCollection::<MatchRecord, _>::new(backend);
    for day in [2, 1] {
        let date = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        matches.insert(NewMatch::new(date, "Court 1")).await.unwrap();
    }
    matches.fetch().await.unwrap();
    let days: Vec<_> = matches
        .records()
        .iter()
        .map(|record| record.match_date.format("%Y-%m-%d").to_string())
        .collect();
    assert_eq!(days, vec!["2024-01-02", "2024-01-01"]);
}

#[tokio::test]
async fn toggle_round_trips_and_rolls_back_on_failure() {
    let backend = signed_in_backend("a@x.com").await;
    let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
    let todo = todos.insert(NewTodo::new("Restring racket")).await.unwrap();
    assert!(!todo.is_complete);

    todos.toggle(&todo.id).await.unwrap();
    todos.fetch().await.unwrap();
    assert!(todos.records()[0].is_complete);

    backend.fail_next(Operation::Update, "update refused");
    let error = todos.toggle(&todo.id).await.unwrap_err();
    assert_eq!(error.to_string(), "update refused");
    assert!(todos.records()[0].is_complete);
    assert_eq!(todos.snapshot().error.as_deref(), Some("update refused"));

    todos.fetch().await.unwrap();
    assert!(todos.records()[0].is_complete);
}

#[tokio::test]
async fn delete_removes_locally_and_remotely() {
    let backend = signed_in_backend("a@x.com").await;
    let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
    let keep = todos.insert(NewTodo::new("keep")).await.unwrap();
    let gone = todos.insert(NewTodo::new("gone")).await.unwrap();

    todos.delete(&gone.id).await.unwrap();
    assert!(todos.records().iter().all(|todo| todo.id != gone.id));
    todos.fetch().await.unwrap();
    let ids: Vec<_> = todos.records().into_iter().map(|todo| todo.id).collect();
    assert_eq!(ids, vec![keep.id]);
}

#[tokio::test]
async fn failed_delete_keeps_the_entry() {
    let backend = signed_in_backend("a@x.com").await;
    let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
    let todo = todos.insert(NewTodo::new("stay")).await.unwrap();
    backend.fail_next(Operation::Delete, "delete refused");
    assert!(matches!(
        todos.delete(&todo.id).await,
        Err(RecordError::Rejected(_))
    ));
    assert_eq!(todos.records().len(), 1);
}

#[tokio::test]
async fn loading_clears_once_and_stays_clear() {
    let backend = MemoryBackend::new();
    let gate = backend.hold_next(Operation::CurrentSession);
    let session = SessionStore::start(backend.clone());
    assert!(session.is_loading());
    tokio::task::yield_now().await;
    assert!(session.is_loading());

    gate.release();
    session.wait_until_loaded().await;
    assert!(!session.is_loading());

    backend.sign_up("a@x.com", "secret1").await.unwrap();
    let mut receiver = session.subscribe();
    receiver
        .wait_for(|state| state.identity.is_some())
        .await
        .unwrap();
    assert!(!session.is_loading());
    backend.sign_out().await.unwrap();
    receiver
        .wait_for(|state| state.identity.is_none())
        .await
        .unwrap();
    assert!(!session.is_loading());
}

#[tokio::test]
async fn stale_fetch_is_discarded() {
    let backend = signed_in_backend("a@x.com").await;
    let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());

    let gate = backend.hold_next(Operation::Select);
    let slow = tokio::spawn({
        let todos = todos.clone();
        async move { todos.fetch().await }
    });
    tokio::task::yield_now().await;

    todos.insert(NewTodo::new("fresh")).await.unwrap();
    todos.fetch().await.unwrap();
    assert_eq!(todos.records().len(), 1);

    gate.release();
    slow.await.unwrap().unwrap();
    assert_eq!(todos.records().len(), 1);
    assert!(!todos.snapshot().loading);
}

#[tokio::test]
async fn writes_from_another_device_reach_a_watching_collection() {
    let backend = signed_in_backend("a@x.com").await;
    let phone = backend.connect();
    phone
        .sign_in_with_password("a@x.com", "secret1")
        .await
        .unwrap();

    let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
    todos.fetch().await.unwrap();
    todos.watch();

    let phone_todos = RecordCollection::<TodoRecord, _>::new(phone);
    phone_todos.insert(NewTodo::new("from phone")).await.unwrap();

    let mut receiver = todos.subscribe();
    let state = receiver
        .wait_for(|state| state.records.len() == 1)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.records[0].title, "from phone");
}

#[tokio::test]
async fn app_routes_through_auth_and_main_screens() {
    let backend = MemoryBackend::new();
    let mut app = App::start(backend.clone(), TableNames::default());
    assert_eq!(app.screen(), Screen::Loading);
    assert_eq!(app.ready().await, Screen::Auth);

    app.session()
        .sign_in("a@x.com", "secret1")
        .await
        .unwrap_err();
    backend.sign_up("a@x.com", "secret1").await.unwrap();
    let mut receiver = app.session().subscribe();
    receiver
        .wait_for(|state| state.identity.is_some())
        .await
        .unwrap();

    assert!(matches!(app.sync().await, Screen::Main(_)));
    let workspace = app.workspace().unwrap();
    assert!(workspace.matches.records().is_empty());
    assert!(workspace.todos.is_active());
}
