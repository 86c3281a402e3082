//! Key/value state store contract for Hearth services
//!
//! The durable device/room/state configuration is owned by an external
//! collaborator. This crate defines the interface the hub consumes:
//! pattern-based reads, acknowledged writes, subscriptions, and a push feed
//! of state mutations. A memory-backed implementation is provided for tests
//! and single-process development setups.

mod memory;

pub use memory::MemoryStateStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a state store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the request
    #[error("state store request failed: {0}")]
    Request(String),
}

/// A single state entry as held by the external store
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StateValue {
    /// Current value (`Value::Null` when unset)
    pub val: Value,

    /// Unix timestamp (ms) of the last mutation
    pub ts: i64,

    /// Whether the value has been acknowledged by the owning device
    pub ack: bool,
}

impl StateValue {
    /// Create an acknowledged value stamped with the current time
    pub fn now(val: Value) -> Self {
        Self {
            val,
            ts: chrono::Utc::now().timestamp_millis(),
            ack: true,
        }
    }
}

/// Push notification for one state mutation
#[derive(Debug, Clone)]
pub struct StateChange {
    /// Fully qualified state id
    pub id: String,

    /// The new state, or `None` when the entry was deleted
    pub state: Option<StateValue>,
}

/// Interface to the external key/value state store
///
/// Implementations must be cheap to share (`Arc<dyn StateStore>`) and must
/// deliver mutations for subscribed patterns through the [`changes`] feed.
///
/// [`changes`]: StateStore::changes
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch all states whose ids match `pattern` (`*` wildcard)
    async fn get_states(&self, pattern: &str) -> StoreResult<HashMap<String, StateValue>>;

    /// Fetch a single state by id
    async fn get_state(&self, id: &str) -> StoreResult<Option<StateValue>>;

    /// Write a state value; `ack` marks the value as device-confirmed
    async fn set_state(&self, id: &str, value: Value, ack: bool) -> StoreResult<()>;

    /// Register interest in mutations of states matching `pattern`
    async fn subscribe_states(&self, pattern: &str) -> StoreResult<()>;

    /// Obtain a receiver for the mutation push feed
    fn changes(&self) -> broadcast::Receiver<StateChange>;
}

/// Match a state id against a store pattern (`*` matches any sequence)
pub fn pattern_matches(pattern: &str, id: &str) -> bool {
    fn matches(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], s) || (!s.is_empty() && matches(p, &s[1..])),
            (Some(pc), Some(sc)) if pc == sc => matches(&p[1..], &s[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), id.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_matches_wildcard() {
        assert!(pattern_matches("hearth.devices.*", "hearth.devices.lamp1"));
        assert!(pattern_matches("*", "anything.at.all"));
        assert!(pattern_matches("hearth.*.lamp1", "hearth.devices.lamp1"));
        assert!(!pattern_matches("hearth.devices.*", "hearth.rooms.kitchen"));
    }

    #[test]
    fn test_pattern_matches_exact() {
        assert!(pattern_matches("a.b.c", "a.b.c"));
        assert!(!pattern_matches("a.b.c", "a.b"));
        assert!(!pattern_matches("a.b", "a.b.c"));
    }

    #[test]
    fn test_state_value_now_is_acked() {
        let v = StateValue::now(serde_json::json!(21.5));
        assert!(v.ack);
        assert!(v.ts > 0);
    }
}
