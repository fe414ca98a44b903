//! Change detection by periodically re-reading a table.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ChangeEvent, ChangeKind, DataBackend, OrderBy};

/// Serialized rows of one table keyed by id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct TableSnapshot {
    rows: BTreeMap<String, String>,
}

impl TableSnapshot {
    pub(crate) fn from_rows(rows: &[Value]) -> Self {
        let rows = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let key = match row.get("id") {
                    Some(Value::String(id)) => id.clone(),
                    Some(id) => id.to_string(),
                    None => format!("#{index}"),
                };
                (key, row.to_string())
            })
            .collect();
        Self { rows }
    }

    /// Kind of change from `self` to `next`. New ids win over removed ids,
    /// which win over edited rows.
    pub(crate) fn diff(&self, next: &Self) -> Option<ChangeKind> {
        if next.rows.keys().any(|id| !self.rows.contains_key(id)) {
            Some(ChangeKind::Insert)
        } else if self.rows.keys().any(|id| !next.rows.contains_key(id)) {
            Some(ChangeKind::Delete)
        } else if self.rows != next.rows {
            Some(ChangeKind::Update)
        } else {
            None
        }
    }
}

/// Background poll of one table. Dropping the last handle stops it.
#[derive(Debug)]
pub struct TablePoller {
    table: String,
    task: JoinHandle<()>,
}

impl TablePoller {
    /// Start polling `table` through `source`. Needs a tokio runtime.
    pub(crate) fn spawn<D: DataBackend>(
        source: D,
        table: &str,
        interval: Duration,
        changes: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        tracing::debug!("Polling {} for changes every {:?}", table, interval);
        let task = tokio::spawn(poll_table(source, table.to_string(), interval, changes));
        Self {
            table: table.to_string(),
            task,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for TablePoller {
    fn drop(&mut self) {
        tracing::debug!("Stopping change poll on {}", self.table);
        self.task.abort();
    }
}

async fn poll_table<D: DataBackend>(
    source: D,
    table: String,
    interval: Duration,
    changes: broadcast::Sender<ChangeEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let order = OrderBy::asc("id");
    let mut previous: Option<TableSnapshot> = None;

    loop {
        ticker.tick().await;
        let rows = match source.select(&table, "*", &order).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::debug!("Change poll on {} failed: {}", table, error);
                continue;
            }
        };
        let current = TableSnapshot::from_rows(&rows);
        if let Some(kind) = previous.as_ref().and_then(|previous| previous.diff(&current)) {
            tracing::debug!("Poll detected {} on {}", kind, table);
            let _ = changes.send(ChangeEvent::new(table.as_str(), kind));
        }
        previous = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::auth::AuthBackend;
    use crate::backend::MemoryBackend;
    use crate::data::ChangeSubscription;
    use crate::subscription::Subscription;

    #[test]
    fn diff_classifies_row_changes() {
        let before = TableSnapshot::from_rows(&[json!({"id": 1, "title": "a"})]);
        let added = TableSnapshot::from_rows(&[
            json!({"id": 1, "title": "a"}),
            json!({"id": 2, "title": "b"}),
        ]);
        let edited = TableSnapshot::from_rows(&[json!({"id": 1, "title": "changed"})]);

        assert_eq!(before.diff(&before.clone()), None);
        assert_eq!(before.diff(&added), Some(ChangeKind::Insert));
        assert_eq!(added.diff(&before), Some(ChangeKind::Delete));
        assert_eq!(before.diff(&edited), Some(ChangeKind::Update));
    }

    #[test]
    fn string_and_numeric_ids_key_the_same_row() {
        let text = TableSnapshot::from_rows(&[json!({"id": "7", "title": "a"})]);
        let number = TableSnapshot::from_rows(&[json!({"id": 7, "title": "a"})]);
        assert_eq!(
            text.rows.keys().collect::<Vec<_>>(),
            number.rows.keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn poller_reports_writes_from_another_client() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        let phone = backend.connect();
        phone.sign_in_with_password("a@x.com", "secret1").await.unwrap();

        let (sender, receiver) = broadcast::channel(8);
        let mut changes = ChangeSubscription::new(Subscription::new(receiver, "poll"), "todos");
        let poller = TablePoller::spawn(backend, "todos", Duration::from_millis(10), sender);
        assert_eq!(poller.table(), "todos");
        tokio::time::sleep(Duration::from_millis(40)).await;

        phone.insert("todos", json!({"title": "from the phone"})).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ChangeEvent::new("todos", ChangeKind::Insert));

        drop(poller);
        tokio::task::yield_now().await;
        assert!(changes.try_recv().is_none());
    }
}
