//! Protocol session engine
//!
//! Transport-independent core of the WebSocket endpoint: the socket handler
//! feeds raw text frames in, the engine validates, gates on registration,
//! dispatches, and pushes frames back through each connection's outbound
//! channel. Keeping the transport out of this layer lets the whole protocol
//! be exercised in tests over plain channels.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use hearth_statestore::{StateChange, StateStore, StoreError, StoreResult};

use super::codec;
use super::connection::{ConnId, ConnectionManager, Outbound};
use super::help;
use super::messages::{
    ClientMessage, DevicesPayload, ErrorCode, MetricBatchEntry, OutboundFrame, RegisterPayload,
    RegisteredPayload, RoomsPayload, ServerMessage, SetStatePayload, StateChangePayload,
};
use super::metrics::RoomMetricsAggregator;
use super::snapshot::{SetStateCheck, SnapshotBuilder};
use super::subscriptions::{DefaultSubscription, SubscriptionRegistry};

/// Close code for an administrative disconnect
pub const CLOSE_ADMIN: u16 = 1000;
/// Close code sent to every client on server shutdown
pub const CLOSE_SHUTDOWN: u16 = 1001;

/// Capacity of the roster event feed
const ROSTER_CAPACITY: usize = 64;

/// Tunables and store layout for one engine instance
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Largest inbound text frame accepted, in bytes
    pub max_msg_bytes: usize,
    /// Advertised event-rate ceiling, echoed to clients at registration
    pub max_events_per_second: u32,
    /// Quiet interval before a room metric batch is flushed
    pub metrics_flush_interval: Duration,
    pub default_subscription: DefaultSubscription,
    /// Store pattern holding device configuration entries
    pub device_pattern: String,
    /// Store pattern holding room configuration entries
    pub room_pattern: String,
    /// Key prefix under which scenes are stored
    pub scene_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_msg_bytes: 65536,
            max_events_per_second: 200,
            metrics_flush_interval: Duration::from_secs(60),
            default_subscription: DefaultSubscription::All,
            device_pattern: "hearth.devices.*".into(),
            room_pattern: "hearth.rooms.*".into(),
            scene_prefix: "hearth.scenes.".into(),
        }
    }
}

/// Lifecycle notifications for observers (admin surfaces, logging)
#[derive(Debug, Clone)]
pub enum RosterEvent {
    Connected { conn_id: ConnId },
    Registered { conn_id: ConnId, client_id: String },
    Disconnected { conn_id: ConnId },
}

/// The shared protocol engine; cheap to clone into socket tasks
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connections: ConnectionManager,
    registry: SubscriptionRegistry,
    snapshots: SnapshotBuilder,
    store: Arc<dyn StateStore>,
    metrics: RoomMetricsAggregator,
    /// Taken once by the batch pump
    batches: Mutex<Option<mpsc::UnboundedReceiver<Vec<MetricBatchEntry>>>>,
    /// Monotonic snapshot sequence counter
    seq: AtomicU64,
    settings: SessionSettings,
    roster: broadcast::Sender<RosterEvent>,
    /// state id -> (device id, capability type), for stateChange fan-out
    state_index: RwLock<HashMap<String, (String, String)>>,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn StateStore>, settings: SessionSettings) -> Self {
        let (metrics, batch_rx) = RoomMetricsAggregator::new(settings.metrics_flush_interval);
        let snapshots = SnapshotBuilder::new(
            Arc::clone(&store),
            settings.device_pattern.clone(),
            settings.room_pattern.clone(),
        );
        let (roster, _) = broadcast::channel(ROSTER_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                connections: ConnectionManager::new(),
                registry: SubscriptionRegistry::new(settings.default_subscription),
                snapshots,
                store,
                metrics,
                batches: Mutex::new(Some(batch_rx)),
                seq: AtomicU64::new(0),
                settings,
                roster,
                state_index: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Build the routing indexes, register store subscriptions, and start
    /// the fan-out pumps
    pub async fn start(&self) -> StoreResult<()> {
        self.inner
            .store
            .subscribe_states(&self.inner.settings.device_pattern)
            .await?;
        self.inner
            .store
            .subscribe_states(&self.inner.settings.room_pattern)
            .await?;
        self.rebuild_indexes().await?;
        self.spawn_pumps();
        Ok(())
    }

    /// Reload device/room configuration into the routing indexes
    pub async fn rebuild_indexes(&self) -> StoreResult<()> {
        let devices = self.inner.snapshots.load_devices().await?;
        let rooms = self.inner.snapshots.load_rooms().await?;

        let mut index = HashMap::new();
        for device in devices.values() {
            for capability in &device.capabilities {
                if capability.state.is_empty() {
                    continue;
                }
                index.insert(
                    capability.state.clone(),
                    (device.id.clone(), capability.kind.clone()),
                );
            }
        }
        self.inner.metrics.build_index(&rooms);

        let mut watched: BTreeSet<String> = index.keys().cloned().collect();
        watched.extend(self.inner.metrics.metric_state_ids());

        tracing::info!(
            devices = devices.len(),
            rooms = rooms.len(),
            watched_states = watched.len(),
            "Routing indexes rebuilt"
        );
        *self
            .inner
            .state_index
            .write()
            .unwrap_or_else(|e| e.into_inner()) = index;

        for state_id in watched {
            self.inner.store.subscribe_states(&state_id).await?;
        }
        Ok(())
    }

    /// Track a freshly upgraded connection
    pub fn accept(
        &self,
        sender: mpsc::UnboundedSender<Outbound>,
        auth_user: Option<String>,
    ) -> ConnId {
        let conn_id = self.inner.connections.add(sender, auth_user);
        self.inner.registry.set_default(conn_id);
        let _ = self.inner.roster.send(RosterEvent::Connected { conn_id });
        conn_id
    }

    /// Drop all state for a closed connection
    pub fn close(&self, conn_id: ConnId) {
        self.inner.connections.remove(conn_id);
        self.inner.registry.remove(conn_id);
        let _ = self.inner.roster.send(RosterEvent::Disconnected { conn_id });
    }

    /// Administrative disconnect of a single connection
    pub fn disconnect(&self, conn_id: ConnId) {
        self.inner.connections.close_with_code(conn_id, CLOSE_ADMIN);
    }

    /// Ask every connected client to go away; used on graceful shutdown
    pub fn shutdown(&self) {
        let ids = self.inner.connections.ids();
        tracing::info!(connections = ids.len(), "Closing all connections for shutdown");
        for conn_id in ids {
            self.inner
                .connections
                .close_with_code(conn_id, CLOSE_SHUTDOWN);
        }
    }

    pub fn roster(&self) -> broadcast::Receiver<RosterEvent> {
        self.inner.roster.subscribe()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Sequence number for the next snapshot build
    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Process one raw inbound text frame
    pub async fn handle_raw(&self, conn_id: ConnId, raw: &str) {
        if raw.len() > self.inner.settings.max_msg_bytes {
            self.send(
                conn_id,
                OutboundFrame::error(
                    ErrorCode::InvalidMessage,
                    format!(
                        "message exceeds {} bytes",
                        self.inner.settings.max_msg_bytes
                    ),
                    None,
                ),
            );
            return;
        }

        let envelope = match codec::validate(raw) {
            Ok(envelope) => envelope,
            Err(invalid) => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::InvalidMessage,
                        invalid.errors.join("; "),
                        invalid.id,
                    ),
                );
                return;
            }
        };
        self.inner
            .connections
            .record_message(conn_id, &envelope.kind, envelope.id.as_deref());

        let message = match ClientMessage::from_envelope(&envelope.kind, envelope.payload.as_ref())
        {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::UnknownType,
                        format!("unknown message type `{}`", envelope.kind),
                        envelope.id,
                    ),
                );
                return;
            }
            Err(e) => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::InvalidMessage,
                        format!("invalid payload: {e}"),
                        envelope.id,
                    ),
                );
                return;
            }
        };

        // Everything except register requires a completed registration.
        if !matches!(message, ClientMessage::Register(_))
            && !self.inner.connections.is_registered(conn_id)
        {
            self.send(
                conn_id,
                OutboundFrame::error(
                    ErrorCode::NotRegistered,
                    "register before sending other messages",
                    envelope.id,
                ),
            );
            return;
        }

        let request_id = envelope.id.clone();
        if let Err(e) = self.dispatch(conn_id, message, envelope.id).await {
            tracing::error!(conn_id = %conn_id, kind = %envelope.kind, error = %e, "Message handling failed");
            self.send(
                conn_id,
                OutboundFrame::error(ErrorCode::InternalError, "internal error", request_id),
            );
        }
    }

    async fn dispatch(
        &self,
        conn_id: ConnId,
        message: ClientMessage,
        request_id: Option<String>,
    ) -> StoreResult<()> {
        match message {
            ClientMessage::Register(payload) => self.handle_register(conn_id, payload, request_id),
            ClientMessage::GetDevices => {
                let devices = self.inner.snapshots.devices_with_values().await?;
                self.send(
                    conn_id,
                    OutboundFrame::reply(
                        ServerMessage::Devices(DevicesPayload { devices }),
                        request_id,
                    ),
                );
                Ok(())
            }
            ClientMessage::GetRooms => {
                let rooms = self.inner.snapshots.rooms_with_values().await?;
                self.send(
                    conn_id,
                    OutboundFrame::reply(ServerMessage::Rooms(RoomsPayload { rooms }), request_id),
                );
                Ok(())
            }
            ClientMessage::GetSnapshot => {
                let snapshot = self.inner.snapshots.build_snapshot(self.next_seq()).await?;
                self.send(
                    conn_id,
                    OutboundFrame::reply(ServerMessage::Snapshot(snapshot), request_id),
                );
                Ok(())
            }
            ClientMessage::Help => {
                self.send(
                    conn_id,
                    OutboundFrame::reply(ServerMessage::Help(help::catalog()), request_id),
                );
                Ok(())
            }
            ClientMessage::Subscribe(filter) => {
                self.inner.registry.subscribe(conn_id, filter.into());
                self.send(
                    conn_id,
                    OutboundFrame::reply(ServerMessage::Subscribed, request_id),
                );
                Ok(())
            }
            ClientMessage::Unsubscribe(filter) => {
                self.inner
                    .registry
                    .unsubscribe(conn_id, filter.map(Into::into));
                self.send(
                    conn_id,
                    OutboundFrame::reply(ServerMessage::Unsubscribed, request_id),
                );
                Ok(())
            }
            ClientMessage::SetState(payload) => {
                self.handle_set_state(conn_id, payload, request_id).await
            }
            ClientMessage::TriggerScene(payload) => {
                self.handle_trigger_scene(conn_id, &payload.scene_id, request_id)
                    .await
            }
            ClientMessage::SaveScene(payload) => {
                let key = self.scene_key(&payload.scene_id);
                self.inner.store.set_state(&key, payload.scene, true).await?;
                self.send(conn_id, OutboundFrame::reply(ServerMessage::Ack, request_id));
                Ok(())
            }
            ClientMessage::DeleteScene(payload) => {
                let key = self.scene_key(&payload.scene_id);
                self.inner.store.set_state(&key, Value::Null, true).await?;
                self.send(conn_id, OutboundFrame::reply(ServerMessage::Ack, request_id));
                Ok(())
            }
        }
    }

    fn handle_register(
        &self,
        conn_id: ConnId,
        payload: RegisterPayload,
        request_id: Option<String>,
    ) -> StoreResult<()> {
        // A client whose cached snapshot predates the current counter missed
        // updates while away; tell it to resync. The registration itself
        // still proceeds.
        let current = self.inner.seq.load(Ordering::SeqCst);
        if payload.last_seq_seen.is_some_and(|seen| seen < current) {
            self.send(
                conn_id,
                OutboundFrame::error(
                    ErrorCode::ResyncRequired,
                    "cached snapshot is stale, re-fetch before trusting local state",
                    None,
                ),
            );
        }

        let client_id = Uuid::new_v4().to_string();
        if !self.inner.connections.mark_registered(
            conn_id,
            client_id.clone(),
            payload.name.clone(),
            payload.version.clone(),
            payload.client_type,
        ) {
            return Err(StoreError::Request("connection vanished".into()));
        }
        tracing::info!(
            conn_id = %conn_id,
            client_id = %client_id,
            name = %payload.name,
            version = %payload.version,
            client_type = %payload.client_type,
            "Client registered"
        );

        let settings = &self.inner.settings;
        self.send(
            conn_id,
            OutboundFrame::reply(
                ServerMessage::Registered(RegisteredPayload {
                    client_id: client_id.clone(),
                    max_msg_bytes: settings.max_msg_bytes,
                    max_events_per_second: settings.max_events_per_second,
                    supports_batching: true,
                    supports_compression: false,
                    default_subscription: self.inner.registry.default_policy().to_string(),
                }),
                request_id,
            ),
        );
        let _ = self
            .inner
            .roster
            .send(RosterEvent::Registered { conn_id, client_id });

        // The initial snapshot is pushed asynchronously so a slow store
        // never blocks the registration reply.
        let engine = self.clone();
        tokio::spawn(async move {
            let seq = engine.next_seq();
            match engine.inner.snapshots.build_snapshot(seq).await {
                Ok(snapshot) => engine.send(
                    conn_id,
                    OutboundFrame::push(ServerMessage::InitialSnapshot(snapshot)),
                ),
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "Initial snapshot failed");
                    engine.send(
                        conn_id,
                        OutboundFrame::error(
                            ErrorCode::InternalError,
                            "initial snapshot failed",
                            None,
                        ),
                    );
                }
            }
        });
        Ok(())
    }

    async fn handle_set_state(
        &self,
        conn_id: ConnId,
        payload: SetStatePayload,
        request_id: Option<String>,
    ) -> StoreResult<()> {
        match self.inner.snapshots.validate_set_state(&payload).await? {
            SetStateCheck::Valid { state_id } => {
                self.inner
                    .store
                    .set_state(&state_id, payload.value, false)
                    .await?;
                self.send(conn_id, OutboundFrame::reply(ServerMessage::Ack, request_id));
            }
            SetStateCheck::UnknownDevice => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::PermissionDenied,
                        format!("unknown device `{}`", payload.device_id),
                        request_id,
                    ),
                );
            }
            SetStateCheck::UnknownCapability => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::PermissionDenied,
                        format!(
                            "device `{}` has no capability `{}` bound to `{}`",
                            payload.device_id, payload.capability, payload.state
                        ),
                        request_id,
                    ),
                );
            }
        }
        Ok(())
    }

    async fn handle_trigger_scene(
        &self,
        conn_id: ConnId,
        scene_id: &str,
        request_id: Option<String>,
    ) -> StoreResult<()> {
        let key = self.scene_key(scene_id);
        match self.inner.store.get_state(&key).await? {
            Some(state) if !state.val.is_null() => {}
            _ => {
                self.send(
                    conn_id,
                    OutboundFrame::error(
                        ErrorCode::PermissionDenied,
                        format!("unknown scene `{scene_id}`"),
                        request_id,
                    ),
                );
                return Ok(());
            }
        }

        // Activation is a state write; the external scene engine observes the
        // trigger state and runs the actual transitions.
        tracing::info!(scene_id = %scene_id, "Triggering scene");
        self.inner
            .store
            .set_state(&format!("{key}.trigger"), Value::Bool(true), false)
            .await?;
        self.send(conn_id, OutboundFrame::reply(ServerMessage::Ack, request_id));
        Ok(())
    }

    fn scene_key(&self, scene_id: &str) -> String {
        format!("{}{}", self.inner.settings.scene_prefix, scene_id)
    }

    /// Route one store mutation: metric states feed the batch buffer,
    /// capability states fan out as immediate `stateChange` pushes
    pub fn handle_store_change(&self, change: StateChange) {
        let Some(state) = change.state else {
            // Deletions carry no value to fan out.
            return;
        };
        if self.inner.metrics.handle_state_change(&change.id, &state) {
            return;
        }

        let target = self
            .inner
            .state_index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&change.id)
            .cloned();
        let Some((device_id, capability)) = target else {
            return;
        };

        let frame = OutboundFrame::push(ServerMessage::StateChange(StateChangePayload {
            device_id: device_id.clone(),
            capability: capability.clone(),
            state: change.id,
            value: state.val,
            timestamp: state.ts,
        }));
        let delivered = self.inner.connections.broadcast_filtered(&frame, |conn_id| {
            self.inner.connections.is_registered(conn_id)
                && self
                    .inner
                    .registry
                    .should_deliver(conn_id, &device_id, &capability)
        });
        tracing::trace!(device_id = %device_id, capability = %capability, delivered, "State change fanned out");
    }

    /// Deliver one flushed metric batch to matching registered clients
    fn deliver_batch(&self, batch: Vec<MetricBatchEntry>) {
        let room_ids: Vec<String> = batch.iter().map(|e| e.room_id.clone()).collect();
        let frame = OutboundFrame::push(ServerMessage::RoomMetricsUpdateBatch(batch));
        self.inner.connections.broadcast_filtered(&frame, |conn_id| {
            self.inner.connections.is_registered(conn_id)
                && self.inner.registry.should_deliver_room(conn_id, &room_ids)
        });
    }

    /// Spawn the store-change and metric-batch pump tasks
    fn spawn_pumps(&self) {
        let engine = self.clone();
        let mut changes = self.inner.store.changes();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => engine.handle_store_change(change),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "State change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("State change pump stopped");
        });

        let batch_rx = self
            .inner
            .batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut batch_rx) = batch_rx {
            let engine = self.clone();
            tokio::spawn(async move {
                while let Some(batch) = batch_rx.recv().await {
                    engine.deliver_batch(batch);
                }
                tracing::debug!("Metric batch pump stopped");
            });
        }
    }

    /// Send a frame, tolerating a connection that has already gone away
    fn send(&self, conn_id: ConnId, frame: OutboundFrame) {
        if let Err(e) = self.inner.connections.send_to(conn_id, frame) {
            tracing::debug!(conn_id = %conn_id, error = %e, "Dropped outbound frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_statestore::{MemoryStateStore, StateValue};
    use serde_json::json;

    fn engine_with_store() -> (SessionEngine, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        store.seed(
            "hearth.devices.lamp1",
            StateValue::now(json!({
                "id": "lamp1",
                "name": "Desk Lamp",
                "type": "light",
                "room": "office",
                "capabilities": [{"type": "switch", "state": "zigbee.lamp1.on"}]
            })),
        );
        let engine = SessionEngine::new(
            store.clone() as Arc<dyn StateStore>,
            SessionSettings::default(),
        );
        (engine, store)
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match rx.try_recv().unwrap() {
            Outbound::Frame(frame) => serde_json::to_value(&frame).unwrap(),
            Outbound::Close { code } => panic!("unexpected close: {code}"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_request_rejected() {
        let (engine, _) = engine_with_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = engine.accept(tx, None);

        engine
            .handle_raw(conn, r#"{"type":"getDevices","id":"1"}"#)
            .await;

        let frame = recv_json(&mut rx);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"]["code"], "NOT_REGISTERED");
        assert_eq!(frame["id"], "1");
    }

    #[tokio::test]
    async fn test_register_replies_with_limits() {
        let (engine, _) = engine_with_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = engine.accept(tx, None);

        engine
            .handle_raw(
                conn,
                r#"{"type":"register","id":"r","payload":{"name":"App","version":"1.0","clientType":"web"}}"#,
            )
            .await;

        let frame = recv_json(&mut rx);
        assert_eq!(frame["type"], "registered");
        assert_eq!(frame["id"], "r");
        assert_eq!(frame["payload"]["maxMsgBytes"], 65536);
        assert_eq!(frame["payload"]["supportsBatching"], true);
        assert!(frame["payload"]["clientId"].is_string());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let store = Arc::new(MemoryStateStore::new());
        let engine = SessionEngine::new(
            store as Arc<dyn StateStore>,
            SessionSettings {
                max_msg_bytes: 32,
                ..Default::default()
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = engine.accept(tx, None);

        let raw = format!(r#"{{"type":"help","id":"{}"}}"#, "x".repeat(64));
        engine.handle_raw(conn, &raw).await;

        let frame = recv_json(&mut rx);
        assert_eq!(frame["error"]["code"], "INVALID_MESSAGE");
        assert!(frame["error"]["message"]
            .as_str()
            .unwrap()
            .contains("exceeds 32 bytes"));
    }

    #[tokio::test]
    async fn test_unknown_type_after_registration() {
        let (engine, _) = engine_with_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = engine.accept(tx, None);

        engine
            .handle_raw(
                conn,
                r#"{"type":"register","payload":{"name":"A","version":"1","clientType":"other"}}"#,
            )
            .await;
        let _registered = recv_json(&mut rx);

        engine
            .handle_raw(conn, r#"{"type":"frobnicate","id":"q"}"#)
            .await;
        let frame = recv_json(&mut rx);
        assert_eq!(frame["error"]["code"], "UNKNOWN_TYPE");
        assert_eq!(frame["id"], "q");
    }

    #[tokio::test]
    async fn test_resync_pushed_for_stale_seq() {
        let (engine, _) = engine_with_store();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = engine.accept(tx, None);

        // Advance the counter past the client's cached snapshot.
        engine.next_seq();
        engine.next_seq();

        engine
            .handle_raw(
                conn,
                r#"{"type":"register","id":"r","payload":{"name":"A","version":"1","clientType":"web","lastSeqSeen":1}}"#,
            )
            .await;

        // The resync push precedes the registered reply and carries no id.
        let resync = recv_json(&mut rx);
        assert_eq!(resync["error"]["code"], "RESYNC_REQUIRED");
        assert!(resync.get("id").is_none());
        let registered = recv_json(&mut rx);
        assert_eq!(registered["type"], "registered");
    }
}
