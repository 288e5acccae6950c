//! In-process sink
//!
//! Enforces the same `event_id` uniqueness as the database and can be told to
//! fail upcoming calls, which makes retry and recovery paths testable without
//! a database. Also backs `--dry-run`.

use async_trait::async_trait;
use esp_common::types::Event;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::{EventSink, InsertOutcome, SinkError};

#[derive(Debug, Default)]
struct State {
    rows: Vec<Event>,
    ids: HashSet<String>,
    transient_failures: u32,
    permanent_failures: u32,
    insert_calls: u64,
}

#[derive(Debug, Default)]
pub struct MemoryEventSink {
    state: Mutex<State>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` calls fail with a transient error
    pub fn fail_next(&self, n: u32) {
        self.state().transient_failures = n;
    }

    /// Make the next `n` inserts fail with a permanent error
    pub fn reject_next(&self, n: u32) {
        self.state().permanent_failures = n;
    }

    /// Stored rows in insertion order
    pub fn events(&self) -> Vec<Event> {
        self.state().rows.clone()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.state().ids.contains(event_id)
    }

    pub fn len(&self) -> usize {
        self.state().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `insert_batch` calls, failed ones included
    pub fn insert_calls(&self) -> u64 {
        self.state().insert_calls
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn insert_batch(&self, events: &[Event]) -> Result<InsertOutcome, SinkError> {
        let mut state = self.state();
        state.insert_calls += 1;

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(SinkError::Transient("injected connection failure".to_string()));
        }
        if state.permanent_failures > 0 {
            state.permanent_failures -= 1;
            return Err(SinkError::Permanent("injected constraint violation".to_string()));
        }

        let mut outcome = InsertOutcome::default();
        for event in events {
            if state.ids.insert(event.event_id.clone()) {
                state.rows.push(event.clone());
                outcome.inserted += 1;
            } else {
                outcome.already_present += 1;
            }
        }
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<(), SinkError> {
        let mut state = self.state();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(SinkError::Transient("injected connection failure".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use esp_common::types::EventType;

    fn event(id: &str) -> Event {
        Event {
            event_id: id.to_string(),
            user_id: "u".into(),
            product_id: "p".into(),
            product_name: "n".into(),
            category: "c".into(),
            price: BigDecimal::from(3),
            event_type: EventType::View,
            event_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicates_within_one_call() {
        let sink = MemoryEventSink::new();
        let outcome = sink
            .insert_batch(&[event("a"), event("a"), event("b")])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.already_present, 1);
        assert!(sink.contains("b"));
    }

    #[tokio::test]
    async fn test_failed_insert_writes_nothing() {
        let sink = MemoryEventSink::new();
        sink.reject_next(1);

        let err = sink.insert_batch(&[event("a")]).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(sink.is_empty());
        assert_eq!(sink.insert_calls(), 1);

        sink.insert_batch(&[event("a")]).await.unwrap();
        assert_eq!(sink.len(), 1);
    }
}
