//! In-memory state store for tests and single-process setups
//!
//! Mirrors the contract of the real networked backend closely enough for the
//! hub to be exercised end to end without one: writes are observable through
//! the same broadcast feed the remote store would push into.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::{pattern_matches, StateChange, StateStore, StateValue, StoreResult};

/// Channel capacity for the mutation feed
const CHANGE_CAPACITY: usize = 1024;

/// Memory-backed [`StateStore`] implementation
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, StateValue>>,
    changes: broadcast::Sender<StateChange>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            states: Mutex::new(HashMap::new()),
            changes,
        }
    }

    /// Seed a state without emitting a change notification
    pub fn seed(&self, id: impl Into<String>, value: StateValue) {
        self.states.lock().unwrap().insert(id.into(), value);
    }

    /// Inject an external mutation, as if another collaborator wrote it
    pub fn push_external(&self, id: impl Into<String>, value: StateValue) {
        let id = id.into();
        self.states
            .lock()
            .unwrap()
            .insert(id.clone(), value.clone());
        let _ = self.changes.send(StateChange {
            id,
            state: Some(value),
        });
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StateStore for MemoryStateStore {
    async fn get_states(&self, pattern: &str) -> StoreResult<HashMap<String, StateValue>> {
        let states = self.states.lock().unwrap();
        Ok(states
            .iter()
            .filter(|(id, _)| pattern_matches(pattern, id))
            .map(|(id, v)| (id.clone(), v.clone()))
            .collect())
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<StateValue>> {
        Ok(self.states.lock().unwrap().get(id).cloned())
    }

    async fn set_state(&self, id: &str, value: Value, ack: bool) -> StoreResult<()> {
        let state = StateValue {
            val: value,
            ts: chrono::Utc::now().timestamp_millis(),
            ack,
        };
        self.states
            .lock()
            .unwrap()
            .insert(id.to_string(), state.clone());
        // Ignore send errors (no subscribers yet)
        let _ = self.changes.send(StateChange {
            id: id.to_string(),
            state: Some(state),
        });
        Ok(())
    }

    async fn subscribe_states(&self, _pattern: &str) -> StoreResult<()> {
        // The memory store broadcasts every mutation; per-pattern filtering
        // happens in the consumers' own indexes.
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStateStore::new();
        store.set_state("a.b", json!(42), true).await.unwrap();

        let state = store.get_state("a.b").await.unwrap().unwrap();
        assert_eq!(state.val, json!(42));
        assert!(state.ack);
    }

    #[tokio::test]
    async fn test_get_states_pattern() {
        let store = MemoryStateStore::new();
        store.set_state("x.devices.a", json!(1), true).await.unwrap();
        store.set_state("x.devices.b", json!(2), true).await.unwrap();
        store.set_state("x.rooms.a", json!(3), true).await.unwrap();

        let devices = store.get_states("x.devices.*").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.contains_key("x.devices.a"));
    }

    #[tokio::test]
    async fn test_changes_feed() {
        let store = MemoryStateStore::new();
        let mut rx = store.changes();

        store.set_state("a", json!("on"), false).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.id, "a");
        assert_eq!(change.state.unwrap().val, json!("on"));
    }

    #[tokio::test]
    async fn test_subscribe_is_accepting() {
        let store = MemoryStateStore::new();
        assert_ok!(store.subscribe_states("x.*").await);
        assert_ok!(store.subscribe_states("exact.key").await);
    }

    #[tokio::test]
    async fn test_seed_does_not_notify() {
        let store = MemoryStateStore::new();
        let mut rx = store.changes();

        store.seed("quiet", StateValue::now(json!(1)));
        assert!(rx.try_recv().is_err());
    }
}
