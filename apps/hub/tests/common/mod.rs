//! Shared test fixtures: a seeded in-memory store and a channel-backed
//! client that drives the session engine without a real socket.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use hearth_hub::services::{CredentialBackend, CredentialError, UserAccount};
use hearth_hub::websocket::{ConnId, Outbound, SessionEngine, SessionSettings};
use hearth_statestore::{MemoryStateStore, StateValue};

/// Store pre-populated with two devices, two rooms and one scene
pub fn seeded_store() -> Arc<MemoryStateStore> {
    let store = Arc::new(MemoryStateStore::new());
    store.seed(
        "hearth.devices.lamp1",
        StateValue::now(json!({
            "id": "lamp1",
            "name": "Desk Lamp",
            "type": "light",
            "room": "office",
            "capabilities": [
                {"type": "switch", "state": "zigbee.lamp1.on"},
                {"type": "brightness", "state": "zigbee.lamp1.level"}
            ]
        })),
    );
    store.seed(
        "hearth.devices.thermo1",
        StateValue::now(json!({
            "id": "thermo1",
            "name": "Thermostat",
            "type": "climate",
            "room": "kitchen",
            "capabilities": [
                {"type": "targetTemperature", "state": "zigbee.thermo1.target"}
            ]
        })),
    );
    store.seed(
        "hearth.rooms.kitchen",
        StateValue::now(json!({
            "id": "kitchen",
            "name": "Kitchen",
            "metrics": [
                {"state": "zigbee.kitchen.temp", "type": "temperature", "unit": "°C"},
                {"state": "zigbee.kitchen.hum", "type": "humidity", "unit": "%"}
            ]
        })),
    );
    store.seed(
        "hearth.rooms.office",
        StateValue::now(json!({
            "id": "office",
            "name": "Office",
            "metrics": [
                {"state": "zigbee.office.temp", "type": "temperature", "unit": "°C"}
            ]
        })),
    );
    store.seed(
        "hearth.scenes.movie-night",
        StateValue::now(json!({"name": "Movie Night", "states": {"zigbee.lamp1.level": 20}})),
    );
    store.seed("zigbee.lamp1.on", StateValue::now(json!(false)));
    store.seed("zigbee.kitchen.temp", StateValue::now(json!(21.0)));
    store
}

/// Engine wired to a seeded store with its pumps running
pub async fn started_engine(settings: SessionSettings) -> (SessionEngine, Arc<MemoryStateStore>) {
    let store = seeded_store();
    let engine = SessionEngine::new(store.clone(), settings);
    assert_ok!(engine.start().await);
    (engine, store)
}

/// A protocol client speaking to the engine over plain channels
pub struct TestClient {
    pub conn_id: ConnId,
    engine: SessionEngine,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    pub fn connect(engine: &SessionEngine) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = engine.accept(tx, None);
        Self {
            conn_id,
            engine: engine.clone(),
            rx,
        }
    }

    pub async fn send(&self, raw: &str) {
        self.engine.handle_raw(self.conn_id, raw).await;
    }

    pub async fn send_json(&self, value: Value) {
        self.send(&value.to_string()).await;
    }

    /// Next frame, waiting up to one second for async pushes
    pub async fn recv(&mut self) -> Value {
        let outbound = tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection channel closed");
        match outbound {
            Outbound::Frame(frame) => serde_json::to_value(&frame).unwrap(),
            Outbound::Close { code } => panic!("unexpected close: {code}"),
        }
    }

    /// Next item including close requests
    pub async fn recv_outbound(&mut self) -> Outbound {
        tokio::time::timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection channel closed")
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        match self.rx.try_recv().ok()? {
            Outbound::Frame(frame) => Some(serde_json::to_value(&frame).unwrap()),
            Outbound::Close { code } => panic!("unexpected close: {code}"),
        }
    }

    /// Register and consume the reply plus the initial snapshot push;
    /// returns (clientId, initialSnapshot seq)
    pub async fn register(&mut self, name: &str) -> (String, u64) {
        self.send_json(json!({
            "type": "register",
            "id": "reg",
            "payload": {"name": name, "version": "1.0", "clientType": "web"}
        }))
        .await;

        let registered = self.recv().await;
        assert_eq!(registered["type"], "registered", "got {registered}");
        let client_id = registered["payload"]["clientId"].as_str().unwrap().to_string();

        let snapshot = self.recv().await;
        assert_eq!(snapshot["type"], "initialSnapshot", "got {snapshot}");
        let seq = snapshot["payload"]["seq"].as_u64().unwrap();
        (client_id, seq)
    }
}

/// Credential backend over a plain user -> password map
pub struct MemoryCredentials {
    accounts: HashMap<String, String>,
}

impl MemoryCredentials {
    pub fn new(accounts: &[(&str, &str)]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialBackend for MemoryCredentials {
    async fn lookup(&self, user: &str) -> Result<Option<UserAccount>, CredentialError> {
        Ok(self.accounts.get(user).map(|_| UserAccount {
            disabled: false,
            has_password: true,
        }))
    }

    async fn check_password(&self, user: &str, password: &str) -> Result<bool, CredentialError> {
        Ok(self.accounts.get(user).is_some_and(|pw| pw == password))
    }
}
