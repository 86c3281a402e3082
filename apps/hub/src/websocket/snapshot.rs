//! On-demand snapshot assembly
//!
//! Devices and rooms live as JSON entries in the external store, one entry
//! per device/room. A snapshot build reads both trees, parses each entry,
//! then resolves every referenced state id concurrently to attach live
//! values. Entries that fail to parse are skipped with a warning rather
//! than failing the whole build.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde_json::Value;

use hearth_statestore::{StateStore, StateValue, StoreResult};

use crate::models::{Device, MetricStatus, Room, Snapshot};

use super::messages::SetStatePayload;

/// Concurrent state fetches per snapshot build
const FETCH_CONCURRENCY: usize = 16;

/// Outcome of validating a `setState` request against the device tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStateCheck {
    /// The request targets a declared capability; carries the state id to
    /// write
    Valid { state_id: String },
    UnknownDevice,
    UnknownCapability,
}

/// Builds sequence-numbered snapshots from the external store
#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn StateStore>,
    device_pattern: String,
    room_pattern: String,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn StateStore>, device_pattern: String, room_pattern: String) -> Self {
        Self {
            store,
            device_pattern,
            room_pattern,
        }
    }

    /// Load and parse the device tree, without live values
    pub async fn load_devices(&self) -> StoreResult<HashMap<String, Device>> {
        let entries = self.store.get_states(&self.device_pattern).await?;
        let mut devices = HashMap::with_capacity(entries.len());
        for (key, state) in entries {
            match parse_entry::<Device>(&state.val) {
                Ok(mut device) => {
                    if device.id.is_empty() {
                        device.id = id_from_key(&key);
                    }
                    devices.insert(device.id.clone(), device);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unparseable device entry");
                }
            }
        }
        Ok(devices)
    }

    /// Load, parse and normalize the room tree, without live values
    pub async fn load_rooms(&self) -> StoreResult<HashMap<String, Room>> {
        let entries = self.store.get_states(&self.room_pattern).await?;
        let mut rooms = HashMap::with_capacity(entries.len());
        for (key, state) in entries {
            match parse_entry::<Room>(&state.val) {
                Ok(mut room) => {
                    if room.id.is_empty() {
                        room.id = id_from_key(&key);
                    }
                    room.normalize();
                    rooms.insert(room.id.clone(), room);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unparseable room entry");
                }
            }
        }
        Ok(rooms)
    }

    /// Devices with capability values resolved from the store
    pub async fn devices_with_values(&self) -> StoreResult<HashMap<String, Device>> {
        let mut devices = self.load_devices().await?;

        let ids: BTreeSet<String> = devices
            .values()
            .flat_map(|d| d.capabilities.iter())
            .filter(|c| !c.state.is_empty())
            .map(|c| c.state.clone())
            .collect();
        let states = self.fetch_states(ids).await;

        for device in devices.values_mut() {
            for capability in &mut device.capabilities {
                capability.value = states
                    .get(&capability.state)
                    .map(|s| s.val.clone());
            }
        }
        Ok(devices)
    }

    /// Rooms with metric values resolved from the store
    pub async fn rooms_with_values(&self) -> StoreResult<HashMap<String, Room>> {
        let mut rooms = self.load_rooms().await?;

        let ids: BTreeSet<String> = rooms
            .values()
            .flat_map(|r| r.metrics.iter())
            .filter(|m| !m.state.is_empty())
            .map(|m| m.state.clone())
            .collect();
        let states = self.fetch_states(ids).await;

        for room in rooms.values_mut() {
            for metric in &mut room.metrics {
                match states.get(&metric.state) {
                    Some(state) => {
                        metric.status = MetricStatus::from_value(&state.val);
                        metric.value = Some(state.val.clone());
                        metric.ts = Some(state.ts);
                    }
                    None => {
                        metric.status = MetricStatus::Nodata;
                        metric.value = None;
                        metric.ts = None;
                    }
                }
            }
        }
        Ok(rooms)
    }

    /// Assemble a full snapshot carrying the given sequence number
    pub async fn build_snapshot(&self, seq: u64) -> StoreResult<Snapshot> {
        let (devices, rooms) =
            tokio::join!(self.devices_with_values(), self.rooms_with_values());
        Ok(Snapshot {
            devices: devices?,
            rooms: rooms?,
            seq,
        })
    }

    /// Check a `setState` request against the declared device tree
    pub async fn validate_set_state(&self, payload: &SetStatePayload) -> StoreResult<SetStateCheck> {
        let devices = self.load_devices().await?;
        let device = match devices.get(&payload.device_id) {
            Some(d) => d,
            None => return Ok(SetStateCheck::UnknownDevice),
        };
        match device.find_capability(&payload.capability, &payload.state) {
            Some(capability) => Ok(SetStateCheck::Valid {
                state_id: capability.state.clone(),
            }),
            None => Ok(SetStateCheck::UnknownCapability),
        }
    }

    /// Fetch many states with bounded concurrency; individual failures are
    /// logged and treated as missing
    async fn fetch_states(&self, ids: BTreeSet<String>) -> HashMap<String, StateValue> {
        let store = &self.store;
        stream::iter(ids)
            .map(|id| async move {
                match store.get_state(&id).await {
                    Ok(Some(state)) => Some((id, state)),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::warn!(state_id = %id, error = %e, "State fetch failed");
                        None
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .filter_map(|r| async move { r })
            .collect()
            .await
    }
}

/// Parse a store entry that may be a JSON object or a JSON-encoded string
fn parse_entry<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
    match value {
        Value::String(raw) => serde_json::from_str(raw),
        other => serde_json::from_value(other.clone()),
    }
}

/// Last dot-separated segment of a store key
fn id_from_key(key: &str) -> String {
    key.rsplit('.').next().unwrap_or(key).to_string()
}
