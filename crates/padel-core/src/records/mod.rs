//! Record Collection Controller.
//!
//! A `RecordCollection` owns the local, newest-first view of one remote table
//! and is the only writer of it. Policy per operation:
//!
//! - `fetch` replaces the whole list. A fetch is dropped when a newer fetch was
//!   issued or a write was confirmed while it was in flight.
//! - `insert` waits for the acknowledgment, then splices the stored row in.
//! - `update` and `toggle` apply locally first and roll back on rejection.
//! - `delete` removes the entry only after the acknowledgment.
//! - every change notification triggers a full `fetch`, including the ones
//!   caused by this collection's own writes.
//!
//! Once torn down, a collection ignores every late result.

mod record;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::data::{DataBackend, Filter, OrderBy};
use crate::models::{join_field_errors, FieldError, RecordId, TodoPatch, TodoRecord};

pub use record::Record;
use record::{sort_newest_first, splice_position};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Invalid input: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Rejected(String),
    #[error("Record {0} is not in the local collection")]
    NotFound(RecordId),
    #[error("Record collection is no longer active")]
    Inactive,
    #[error("Malformed record payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl RecordError {
    /// Field errors when the failure was local validation.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Published collection snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<R> {
    pub records: Vec<R>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<R> Default for CollectionState<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

struct Inner<R: Record, D: DataBackend> {
    backend: D,
    table: String,
    state: watch::Sender<CollectionState<R>>,
    active: AtomicBool,
    fetch_generation: AtomicU64,
    confirmed_writes: AtomicU64,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record, D: DataBackend> Inner<R, D> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> RecordResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RecordError::Inactive)
        }
    }

    fn publish(&self, update: impl FnOnce(&mut CollectionState<R>)) {
        if self.is_active() {
            self.state.send_modify(update);
        }
    }

    fn stop_watcher(&self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Invalidate fetches that read the table before this write landed.
    fn confirm_write(&self) {
        self.confirmed_writes.fetch_add(1, Ordering::SeqCst);
    }

    fn reject(&self, action: &str, message: String) -> RecordError {
        tracing::warn!("{} {} on {} rejected: {}", R::KIND, action, self.table, message);
        self.publish(|state| state.error = Some(message.clone()));
        RecordError::Rejected(message)
    }
}

impl<R: Record, D: DataBackend> Drop for Inner<R, D> {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Local view of one remote table. Clones share the same view.
pub struct RecordCollection<R: Record, D: DataBackend> {
    inner: Arc<Inner<R, D>>,
}

impl<R: Record, D: DataBackend> Clone for RecordCollection<R, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Record, D: DataBackend> RecordCollection<R, D> {
    /// Collection over the record kind's default table.
    pub fn new(backend: D) -> Self {
        Self::with_table(backend, R::DEFAULT_TABLE)
    }

    pub fn with_table(backend: D, table: impl Into<String>) -> Self {
        let (state, _) = watch::channel(CollectionState::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                table: table.into(),
                state,
                active: AtomicBool::new(true),
                fetch_generation: AtomicU64::new(0),
                confirmed_writes: AtomicU64::new(0),
                watcher: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.inner.table
    }

    #[must_use]
    pub fn snapshot(&self) -> CollectionState<R> {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn records(&self) -> Vec<R> {
        self.inner.state.borrow().records.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CollectionState<R>> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Replace the local list with the remote table.
    ///
    /// A failed fetch keeps the previous list and records the error. A fetch
    /// that finishes after a newer one was issued, or after a write was
    /// confirmed, is discarded.
    pub async fn fetch(&self) -> RecordResult<()> {
        let inner = &self.inner;
        inner.ensure_active()?;
        let generation = inner.fetch_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let writes_seen = inner.confirmed_writes.load(Ordering::SeqCst);
        inner.publish(|state| state.loading = true);
        tracing::debug!("Fetching {} (generation {})", inner.table, generation);

        let result = inner
            .backend
            .select(&inner.table, R::COLUMNS, &OrderBy::desc(R::ORDER_COLUMN))
            .await;

        inner.ensure_active()?;
        if inner.fetch_generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale fetch of {} (generation {})", inner.table, generation);
            return Ok(());
        }
        if inner.confirmed_writes.load(Ordering::SeqCst) != writes_seen {
            tracing::debug!(
                "Discarding fetch of {} that predates a confirmed write",
                inner.table
            );
            inner.publish(|state| state.loading = false);
            return Ok(());
        }

        let decoded = match result {
            Ok(rows) => decode_rows::<R>(rows),
            Err(error) => Err(RecordError::Rejected(error.to_string())),
        };
        match decoded {
            Ok(records) => {
                tracing::debug!("Fetched {} {} rows", records.len(), inner.table);
                inner.publish(|state| {
                    state.records = records;
                    state.loading = false;
                    state.error = None;
                });
                Ok(())
            }
            Err(error) => {
                tracing::warn!("Fetch of {} failed: {}", inner.table, error);
                let message = error.to_string();
                inner.publish(|state| {
                    state.loading = false;
                    state.error = Some(message);
                });
                Err(error)
            }
        }
    }

    /// Validate, insert, then splice the acknowledged row into place.
    pub async fn insert(&self, new: R::New) -> RecordResult<R> {
        let inner = &self.inner;
        inner.ensure_active()?;
        let errors = R::validate_new(&new);
        if !errors.is_empty() {
            return Err(RecordError::Validation(errors));
        }
        let payload = serde_json::to_value(&new)?;

        let result = inner.backend.insert(&inner.table, payload).await;
        inner.ensure_active()?;
        let row = result.map_err(|error| inner.reject("insert", error.to_string()))?;
        let record: R = serde_json::from_value(row)?;

        inner.confirm_write();
        inner.publish(|state| {
            state.records.retain(|existing| existing.id() != record.id());
            let position = splice_position(&state.records, &record);
            state.records.insert(position, record.clone());
        });
        Ok(record)
    }

    /// Patch an entry locally, then on the remote; roll back on rejection.
    pub async fn update(&self, id: &RecordId, patch: R::Patch) -> RecordResult<()> {
        let inner = &self.inner;
        inner.ensure_active()?;
        let errors = R::validate_patch(&patch);
        if !errors.is_empty() {
            return Err(RecordError::Validation(errors));
        }
        let payload = serde_json::to_value(&patch)?;

        let mut previous = None;
        inner.state.send_if_modified(|state| {
            let Some(record) = state.records.iter_mut().find(|record| record.id() == id) else {
                return false;
            };
            previous = Some(record.clone());
            record.apply_patch(&patch);
            sort_newest_first(&mut state.records);
            true
        });
        let previous = previous.ok_or_else(|| RecordError::NotFound(id.clone()))?;

        let result = inner
            .backend
            .update(&inner.table, &Filter::eq("id", id.as_str()), payload)
            .await;
        inner.ensure_active()?;
        if let Err(error) = result {
            inner.publish(|state| {
                if let Some(record) = state.records.iter_mut().find(|record| record.id() == id) {
                    *record = previous;
                    sort_newest_first(&mut state.records);
                }
            });
            return Err(inner.reject("update", error.to_string()));
        }
        inner.confirm_write();
        inner.publish(|state| {
            if let Some(record) = state.records.iter_mut().find(|record| record.id() == id) {
                record.apply_patch(&patch);
                sort_newest_first(&mut state.records);
            }
        });
        Ok(())
    }

    /// Delete remotely; the local entry goes only once the delete succeeded.
    pub async fn delete(&self, id: &RecordId) -> RecordResult<()> {
        let inner = &self.inner;
        inner.ensure_active()?;
        let result = inner
            .backend
            .delete(&inner.table, &Filter::eq("id", id.as_str()))
            .await;
        inner.ensure_active()?;
        result.map_err(|error| inner.reject("delete", error.to_string()))?;
        inner.confirm_write();
        inner.publish(|state| state.records.retain(|record| record.id() != id));
        Ok(())
    }

    /// Refetch on every change notification for this table until torn down.
    ///
    /// Calling it again replaces the previous registration.
    pub fn watch(&self) {
        if !self.is_active() {
            return;
        }
        let mut changes = self.inner.backend.subscribe_to_changes(&self.inner.table);
        let weak: Weak<Inner<R, D>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let collection = Self { inner };
                if !collection.is_active() {
                    break;
                }
                tracing::debug!("{} on {}, refetching", change.kind, change.table);
                if let Err(error) = collection.fetch().await {
                    tracing::debug!("Refetch after change failed: {}", error);
                }
            }
        });

        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop listening and ignore every result that is still in flight.
    pub fn teardown(&self) {
        if self.inner.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Tearing down {} collection", self.inner.table);
        }
        self.inner.stop_watcher();
    }
}

impl<D: DataBackend> RecordCollection<TodoRecord, D> {
    /// Flip `is_complete` optimistically.
    pub async fn toggle(&self, id: &RecordId) -> RecordResult<()> {
        let current = self
            .inner
            .state
            .borrow()
            .records
            .iter()
            .find(|record| record.id == *id)
            .map(|record| record.is_complete)
            .ok_or_else(|| RecordError::NotFound(id.clone()))?;
        self.update(id, TodoPatch::completion(!current)).await
    }
}

fn decode_rows<R: Record>(rows: Vec<Value>) -> RecordResult<Vec<R>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(RecordError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::AuthBackend;
    use crate::backend::{MemoryBackend, Operation};
    use crate::models::{MatchRecord, NewMatch, NewTodo};

    async fn signed_in() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        backend
    }

    fn match_on(day: u32, location: &str) -> NewMatch {
        NewMatch::new(
            Utc.with_ymd_and_hms(2024, 1, day, 18, 0, 0).unwrap(),
            location,
        )
    }

    fn locations(collection: &RecordCollection<MatchRecord, MemoryBackend>) -> Vec<String> {
        collection
            .records()
            .into_iter()
            .map(|record| record.location)
            .collect()
    }

    #[tokio::test]
    async fn fetch_replaces_collection_newest_first() {
        let backend = signed_in().await;
        let writer = RecordCollection::<MatchRecord, _>::new(backend.clone());
        writer.insert(match_on(1, "Club A")).await.unwrap();
        writer.insert(match_on(2, "Club B")).await.unwrap();

        let reader = RecordCollection::<MatchRecord, _>::new(backend);
        reader.fetch().await.unwrap();
        assert_eq!(locations(&reader), vec!["Club B", "Club A"]);
        assert!(!reader.snapshot().loading);
    }

    #[tokio::test]
    async fn insert_splices_into_sorted_position() {
        let backend = signed_in().await;
        let matches = RecordCollection::<MatchRecord, _>::new(backend);
        matches.insert(match_on(1, "First")).await.unwrap();
        matches.insert(match_on(3, "Third")).await.unwrap();
        matches.insert(match_on(2, "Second")).await.unwrap();
        assert_eq!(locations(&matches), vec!["Third", "Second", "First"]);
    }

    #[tokio::test]
    async fn invalid_insert_never_reaches_backend() {
        let backend = signed_in().await;
        let matches = RecordCollection::<MatchRecord, _>::new(backend.clone());
        let error = matches.insert(match_on(1, "  ")).await.unwrap_err();
        assert_eq!(error.field_errors().len(), 1);
        assert_eq!(error.field_errors()[0].field, "location");
        assert!(backend.table_rows("matches").is_empty());
    }

    #[tokio::test]
    async fn rejected_insert_leaves_collection_unchanged() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        todos.insert(NewTodo::new("keep")).await.unwrap();
        backend.fail_next(Operation::Insert, "insert refused");

        let error = todos.insert(NewTodo::new("drop")).await.unwrap_err();
        assert_eq!(error.to_string(), "insert refused");
        assert_eq!(todos.records().len(), 1);
        assert_eq!(todos.snapshot().error.as_deref(), Some("insert refused"));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_records() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        todos.insert(NewTodo::new("cached")).await.unwrap();
        backend.fail_next(Operation::Select, "timeout");

        assert!(todos.fetch().await.is_err());
        let snapshot = todos.snapshot();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.error.as_deref(), Some("timeout"));
        assert!(!snapshot.loading);

        todos.fetch().await.unwrap();
        assert_eq!(todos.snapshot().error, None);
    }

    #[tokio::test]
    async fn update_patches_in_place() {
        let backend = signed_in().await;
        let matches = RecordCollection::<MatchRecord, _>::new(backend);
        let record = matches.insert(match_on(1, "Club A")).await.unwrap();
        let patch = crate::models::MatchPatch {
            score_team_a: Some(Some(6)),
            score_team_b: Some(Some(4)),
            ..Default::default()
        };
        matches.update(&record.id, patch).await.unwrap();
        matches.fetch().await.unwrap();
        let stored = &matches.records()[0];
        assert_eq!(stored.score_team_a, Some(6));
        assert_eq!(stored.score_team_b, Some(4));
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend);
        let error = todos.toggle(&RecordId::new("missing")).await.unwrap_err();
        assert!(matches!(error, RecordError::NotFound(_)));
    }

    #[tokio::test]
    async fn toggle_is_visible_before_acknowledgment() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        let todo = todos.insert(NewTodo::new("serve")).await.unwrap();

        let gate = backend.hold_next(Operation::Update);
        let pending = tokio::spawn({
            let todos = todos.clone();
            let id = todo.id.clone();
            async move { todos.toggle(&id).await }
        });
        let mut receiver = todos.subscribe();
        receiver
            .wait_for(|state| state.records.first().is_some_and(|todo| todo.is_complete))
            .await
            .unwrap();
        gate.release();
        pending.await.unwrap().unwrap();
        assert!(todos.records()[0].is_complete);
    }

    #[tokio::test]
    async fn teardown_ignores_late_results() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        todos.insert(NewTodo::new("x")).await.unwrap();

        let gate = backend.hold_next(Operation::Select);
        let pending = tokio::spawn({
            let todos = todos.clone();
            async move { todos.fetch().await }
        });
        tokio::task::yield_now().await;
        todos.teardown();
        gate.release();

        assert!(matches!(pending.await.unwrap(), Err(RecordError::Inactive)));
        assert!(!todos.is_active());
        assert!(matches!(
            todos.insert(NewTodo::new("y")).await,
            Err(RecordError::Inactive)
        ));
    }

    #[tokio::test]
    async fn fetch_in_flight_during_delete_does_not_restore_the_row() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        let keep = todos.insert(NewTodo::new("keep")).await.unwrap();
        let gone = todos.insert(NewTodo::new("gone")).await.unwrap();

        let gate = backend.hold_next(Operation::Select);
        let pending = tokio::spawn({
            let todos = todos.clone();
            async move { todos.fetch().await }
        });
        tokio::task::yield_now().await;

        todos.delete(&gone.id).await.unwrap();
        gate.release();
        pending.await.unwrap().unwrap();

        let ids: Vec<_> = todos.records().into_iter().map(|todo| todo.id).collect();
        assert_eq!(ids, vec![keep.id]);
        assert!(!todos.snapshot().loading);
    }

    #[tokio::test]
    async fn fetch_in_flight_during_insert_does_not_drop_the_row() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());

        let gate = backend.hold_next(Operation::Select);
        let pending = tokio::spawn({
            let todos = todos.clone();
            async move { todos.fetch().await }
        });
        tokio::task::yield_now().await;

        let added = todos.insert(NewTodo::new("book court")).await.unwrap();
        gate.release();
        pending.await.unwrap().unwrap();

        assert_eq!(todos.records(), vec![added]);
        assert!(!todos.snapshot().loading);
    }

    #[tokio::test]
    async fn fetch_in_flight_during_update_keeps_the_confirmed_patch() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        let todo = todos.insert(NewTodo::new("new grips")).await.unwrap();

        let gate = backend.hold_next(Operation::Select);
        let pending = tokio::spawn({
            let todos = todos.clone();
            async move { todos.fetch().await }
        });
        tokio::task::yield_now().await;

        todos.toggle(&todo.id).await.unwrap();
        gate.release();
        pending.await.unwrap().unwrap();

        assert!(todos.records()[0].is_complete);
    }

    #[tokio::test]
    async fn match_fetch_requests_the_match_columns() {
        assert_eq!(
            MatchRecord::COLUMNS.split(',').collect::<Vec<_>>(),
            vec![
                "id",
                "match_date",
                "location",
                "players",
                "score_team_a",
                "score_team_b"
            ]
        );
        let backend = signed_in().await;
        let matches = RecordCollection::<MatchRecord, _>::new(backend);
        let inserted = matches.insert(match_on(4, "Club C")).await.unwrap();
        matches.fetch().await.unwrap();
        assert_eq!(matches.records(), vec![inserted]);
    }

    #[tokio::test]
    async fn watch_refetches_on_changes_from_other_clients() {
        let backend = signed_in().await;
        let todos = RecordCollection::<TodoRecord, _>::new(backend.clone());
        todos.watch();

        let other = RecordCollection::<TodoRecord, _>::new(backend.clone());
        other.insert(NewTodo::new("from elsewhere")).await.unwrap();

        let mut receiver = todos.subscribe();
        receiver
            .wait_for(|state| state.records.len() == 1)
            .await
            .unwrap();
        assert_eq!(todos.records()[0].title, "from elsewhere");
    }
}
