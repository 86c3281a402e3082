//! Per-connection subscription filters
//!
//! A connection without an explicit filter falls back to the configured
//! default policy. An explicit empty filter means "deliver everything".
//! `subscribe` replaces the filter wholesale rather than merging: clients
//! declare their current interest instead of accumulating additions.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use super::connection::ConnId;
use super::messages::FilterPayload;

/// Delivery policy for connections without an explicit filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultSubscription {
    #[default]
    All,
    None,
}

impl std::str::FromStr for DefaultSubscription {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            other => Err(format!("invalid default subscription policy: {other}")),
        }
    }
}

impl std::fmt::Display for DefaultSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Per-connection subscription predicate; the three lists are deduplicated
/// sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub device_ids: BTreeSet<String>,
    pub rooms: BTreeSet<String>,
    pub capability_types: BTreeSet<String>,
}

impl SubscriptionFilter {
    pub fn is_empty(&self) -> bool {
        self.device_ids.is_empty() && self.rooms.is_empty() && self.capability_types.is_empty()
    }
}

impl From<FilterPayload> for SubscriptionFilter {
    fn from(payload: FilterPayload) -> Self {
        Self {
            device_ids: payload.device_ids.into_iter().collect(),
            rooms: payload.rooms.into_iter().collect(),
            capability_types: payload.capability_types.into_iter().collect(),
        }
    }
}

/// Registry of connection -> filter, consulted on every push
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    default: DefaultSubscription,
    filters: Arc<DashMap<ConnId, SubscriptionFilter>>,
}

impl SubscriptionRegistry {
    pub fn new(default: DefaultSubscription) -> Self {
        Self {
            default,
            filters: Arc::new(DashMap::new()),
        }
    }

    pub fn default_policy(&self) -> DefaultSubscription {
        self.default
    }

    /// Install the default filter for a new connection: policy `all` gets
    /// an explicit empty (match-everything) filter, policy `none` gets no
    /// filter at all.
    pub fn set_default(&self, conn_id: ConnId) {
        if self.default == DefaultSubscription::All {
            self.filters.insert(conn_id, SubscriptionFilter::default());
        }
    }

    /// Replace the connection's filter wholesale
    pub fn subscribe(&self, conn_id: ConnId, filter: SubscriptionFilter) {
        self.filters.insert(conn_id, filter);
    }

    /// Remove entries from the connection's filter
    ///
    /// An absent or empty filter clears all filtering (back to "no explicit
    /// filter"); otherwise each list is set-differenced independently. An
    /// unsubscribe that empties all three lists leaves an explicit empty
    /// filter in place, which matches everything.
    pub fn unsubscribe(&self, conn_id: ConnId, filter: Option<SubscriptionFilter>) {
        match filter {
            None => {
                self.filters.remove(&conn_id);
            }
            Some(f) if f.is_empty() => {
                self.filters.remove(&conn_id);
            }
            Some(f) => {
                if let Some(mut current) = self.filters.get_mut(&conn_id) {
                    current.device_ids.retain(|d| !f.device_ids.contains(d));
                    current.rooms.retain(|r| !f.rooms.contains(r));
                    current
                        .capability_types
                        .retain(|c| !f.capability_types.contains(c));
                }
            }
        }
    }

    /// Drop all filter state for a closed connection
    pub fn remove(&self, conn_id: ConnId) {
        self.filters.remove(&conn_id);
    }

    /// Current filter, if the connection has an explicit one
    pub fn filter(&self, conn_id: ConnId) -> Option<SubscriptionFilter> {
        self.filters.get(&conn_id).map(|f| f.clone())
    }

    /// Decide delivery of a device state-change event
    ///
    /// Room membership is deliberately not consulted on this path; room
    /// filters apply to metric batches only.
    pub fn should_deliver(&self, conn_id: ConnId, device_id: &str, capability: &str) -> bool {
        match self.filters.get(&conn_id) {
            None => self.default == DefaultSubscription::All,
            Some(f) if f.is_empty() => true,
            Some(f) => {
                (f.device_ids.is_empty() || f.device_ids.contains(device_id))
                    && (f.capability_types.is_empty() || f.capability_types.contains(capability))
            }
        }
    }

    /// Decide delivery of a metric batch touching the given rooms
    ///
    /// Batch-level, not per-entry: the whole batch is delivered when any
    /// room in it matches the filter.
    pub fn should_deliver_room(&self, conn_id: ConnId, room_ids: &[String]) -> bool {
        match self.filters.get(&conn_id) {
            None => self.default == DefaultSubscription::All,
            Some(f) if f.is_empty() => true,
            Some(f) => {
                f.rooms.is_empty() || room_ids.iter().any(|room| f.rooms.contains(room))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn filter(devices: &[&str], rooms: &[&str], caps: &[&str]) -> SubscriptionFilter {
        SubscriptionFilter {
            device_ids: devices.iter().map(|s| s.to_string()).collect(),
            rooms: rooms.iter().map(|s| s.to_string()).collect(),
            capability_types: caps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_all_installs_empty_filter() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.set_default(conn);

        assert_eq!(registry.filter(conn), Some(SubscriptionFilter::default()));
        assert!(registry.should_deliver(conn, "d1", "switch"));
    }

    #[test]
    fn test_default_none_blocks_unfiltered_connection() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::None);
        let conn = Uuid::new_v4();
        registry.set_default(conn);

        assert_eq!(registry.filter(conn), None);
        assert!(!registry.should_deliver(conn, "d1", "switch"));
        assert!(!registry.should_deliver_room(conn, &["kitchen".into()]));
    }

    #[test]
    fn test_device_filter_matching() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &[]));

        assert!(registry.should_deliver(conn, "d1", "switch"));
        assert!(!registry.should_deliver(conn, "d2", "switch"));
    }

    #[test]
    fn test_capability_filter_is_anded() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &["brightness"]));

        assert!(registry.should_deliver(conn, "d1", "brightness"));
        assert!(!registry.should_deliver(conn, "d1", "switch"));
        assert!(!registry.should_deliver(conn, "d2", "brightness"));
    }

    #[test]
    fn test_subscribe_replaces_not_merges() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &[]));
        registry.subscribe(conn, filter(&["d2"], &[], &[]));

        assert!(!registry.should_deliver(conn, "d1", "switch"));
        assert!(registry.should_deliver(conn, "d2", "switch"));
    }

    #[test]
    fn test_unsubscribe_clears_to_default() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::None);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &[]));
        registry.unsubscribe(conn, None);

        // Back to "no explicit filter": default policy applies again.
        assert_eq!(registry.filter(conn), None);
        assert!(!registry.should_deliver(conn, "d1", "switch"));

        // Repeating the clear is idempotent.
        registry.unsubscribe(conn, None);
        assert_eq!(registry.filter(conn), None);
    }

    #[test]
    fn test_unsubscribe_set_difference_per_field() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1", "d2"], &["kitchen"], &["switch"]));
        registry.unsubscribe(conn, Some(filter(&["d1"], &[], &[])));

        let f = registry.filter(conn).unwrap();
        assert_eq!(f.device_ids, filter(&["d2"], &[], &[]).device_ids);
        assert_eq!(f.rooms.len(), 1);
        assert_eq!(f.capability_types.len(), 1);
    }

    #[test]
    fn test_unsubscribe_emptying_all_fields_leaves_empty_filter() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::None);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &[]));
        registry.unsubscribe(conn, Some(filter(&["d1"], &[], &[])));

        // The explicit-but-empty filter matches everything, even under
        // default policy `none`.
        let f = registry.filter(conn).unwrap();
        assert!(f.is_empty());
        assert!(registry.should_deliver(conn, "d9", "anything"));
    }

    #[test]
    fn test_room_batch_delivery_any_match() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&[], &["kitchen"], &[]));

        assert!(registry.should_deliver_room(conn, &["kitchen".into(), "office".into()]));
        assert!(!registry.should_deliver_room(conn, &["office".into()]));
    }

    #[test]
    fn test_remove_drops_filter_state() {
        let registry = SubscriptionRegistry::new(DefaultSubscription::All);
        let conn = Uuid::new_v4();
        registry.subscribe(conn, filter(&["d1"], &[], &[]));
        registry.remove(conn);
        assert_eq!(registry.filter(conn), None);
    }

    #[test]
    fn test_filter_deduplicates() {
        let payload = FilterPayload {
            device_ids: vec!["d1".into(), "d1".into(), "d2".into()],
            rooms: vec![],
            capability_types: vec![],
        };
        let f = SubscriptionFilter::from(payload);
        assert_eq!(f.device_ids.len(), 2);
    }
}
