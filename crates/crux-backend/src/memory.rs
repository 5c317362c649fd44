//! In-memory [`DataPlane`] used by tests in this workspace.
//!
//! Supports the same `column=eq.value` filters as the HTTP client, counts
//! calls so debounce tests can assert "exactly one fetch", and can be primed
//! to fail upcoming mutations for rollback tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::DataPlane;
use crate::error::BackendError;

#[derive(Default)]
pub struct MemoryDataPlane {
    tables: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    pending_failures: Mutex<VecDeque<BackendError>>,
    fetches: AtomicUsize,
    mutations: AtomicUsize,
}

impl MemoryDataPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, topic: &str, rows: Vec<serde_json::Value>) {
        self.tables
            .lock()
            .expect("table lock poisoned")
            .insert(topic.into(), rows);
    }

    pub fn rows(&self, topic: &str) -> Vec<serde_json::Value> {
        self.tables
            .lock()
            .expect("table lock poisoned")
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Queue an error; the next mutation consumes it and fails.
    pub fn fail_next(&self, err: BackendError) {
        self.pending_failures
            .lock()
            .expect("failure lock poisoned")
            .push_back(err);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<BackendError> {
        self.pending_failures
            .lock()
            .expect("failure lock poisoned")
            .pop_front()
    }

    fn matches(row: &serde_json::Value, filter: &str) -> bool {
        filter.split('&').all(|part| {
            let Some((column, rest)) = part.split_once('=') else {
                return true;
            };
            let Some(value) = rest.strip_prefix("eq.") else {
                return true;
            };
            match row.get(column) {
                Some(serde_json::Value::String(s)) => s == value,
                Some(other) => other.to_string() == value,
                None => false,
            }
        })
    }

    /// Upsert identity: (room, user_id) when both are present (typing rows),
    /// otherwise the row's `id`.
    fn same_row(a: &serde_json::Value, b: &serde_json::Value) -> bool {
        if a.get("room").is_some() && a.get("user_id").is_some() {
            return a.get("room") == b.get("room") && a.get("user_id") == b.get("user_id");
        }
        a.get("id").is_some() && a.get("id") == b.get("id")
    }
}

#[async_trait]
impl DataPlane for MemoryDataPlane {
    async fn fetch_rows(
        &self,
        topic: &str,
        filter: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows(topic);
        Ok(match filter {
            Some(f) => rows.into_iter().filter(|r| Self::matches(r, f)).collect(),
            None => rows,
        })
    }

    async fn upsert_row(
        &self,
        topic: &str,
        row: serde_json::Value,
    ) -> Result<(), BackendError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut tables = self.tables.lock().expect("table lock poisoned");
        let rows = tables.entry(topic.into()).or_default();
        match rows.iter_mut().find(|r| Self::same_row(&row, r)) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    async fn delete_rows(&self, topic: &str, filter: &str) -> Result<(), BackendError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut tables = self.tables.lock().expect("table lock poisoned");
        if let Some(rows) = tables.get_mut(topic) {
            rows.retain(|r| !Self::matches(r, filter));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn filters_and_counts() {
        let mem = MemoryDataPlane::new();
        mem.seed(
            "event_participants",
            vec![
                json!({"id": "a", "event_id": "e1"}),
                json!({"id": "b", "event_id": "e2"}),
            ],
        );

        let rows = mem
            .fetch_rows("event_participants", Some("event_id=eq.e1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(mem.fetch_count(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_typing_row() {
        let mem = MemoryDataPlane::new();
        let first = json!({"room": "group:1", "user_id": "u", "is_active": true});
        let second = json!({"room": "group:1", "user_id": "u", "is_active": false});

        mem.upsert_row("typing_indicators", first).await.unwrap();
        mem.upsert_row("typing_indicators", second).await.unwrap();

        let rows = mem.rows("typing_indicators");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["is_active"], false);
    }

    #[tokio::test]
    async fn primed_failure_hits_next_mutation_only() {
        let mem = MemoryDataPlane::new();
        mem.fail_next(BackendError::Api { status: 500, message: "boom".into() });

        let err = mem
            .upsert_row("gear_items", json!({"id": "g"}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 500, .. }));

        mem.upsert_row("gear_items", json!({"id": "g"})).await.unwrap();
        assert_eq!(mem.rows("gear_items").len(), 1);
    }
}
