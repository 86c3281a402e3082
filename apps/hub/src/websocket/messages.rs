//! Wire protocol types for the hub's WebSocket endpoint
//!
//! Every frame is a JSON object `{type, id?, payload?}`. Responses mirror
//! the request `id`; unsolicited pushes omit it. Error frames carry an
//! `error` object instead of a `payload`.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::models::{Device, MetricStatus, Room, Snapshot};

// =============================================================================
// Client -> Server
// =============================================================================

/// Category of connecting client
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Mobile,
    Web,
    Desktop,
    #[default]
    Other,
}

impl std::fmt::Display for ClientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientType::Mobile => write!(f, "mobile"),
            ClientType::Web => write!(f, "web"),
            ClientType::Desktop => write!(f, "desktop"),
            ClientType::Other => write!(f, "other"),
        }
    }
}

/// Payload of a `register` message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub name: String,
    pub version: String,
    pub client_type: ClientType,
    /// Highest snapshot sequence number the client has cached
    #[serde(default)]
    pub last_seq_seen: Option<u64>,
}

/// Payload of `subscribe` and `unsubscribe` messages
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterPayload {
    #[serde(default)]
    pub device_ids: Vec<String>,
    #[serde(default)]
    pub rooms: Vec<String>,
    #[serde(default)]
    pub capability_types: Vec<String>,
}

impl FilterPayload {
    pub fn is_empty(&self) -> bool {
        self.device_ids.is_empty() && self.rooms.is_empty() && self.capability_types.is_empty()
    }
}

/// Payload of a `setState` message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStatePayload {
    pub device_id: String,
    pub capability: String,
    pub state: String,
    pub value: Value,
}

/// Payload of a `triggerScene` or `deleteScene` message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRefPayload {
    pub scene_id: String,
}

/// Payload of a `saveScene` message
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveScenePayload {
    pub scene_id: String,
    pub scene: Value,
}

/// A validated, typed client message
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Register(RegisterPayload),
    GetDevices,
    GetRooms,
    GetSnapshot,
    Help,
    Subscribe(FilterPayload),
    Unsubscribe(Option<FilterPayload>),
    SetState(SetStatePayload),
    TriggerScene(SceneRefPayload),
    SaveScene(SaveScenePayload),
    DeleteScene(SceneRefPayload),
}

impl ClientMessage {
    /// Build a typed message from a validated envelope. Returns `Ok(None)`
    /// for message types this server does not know.
    pub fn from_envelope(
        kind: &str,
        payload: Option<&Value>,
    ) -> Result<Option<Self>, serde_json::Error> {
        fn decode<T: serde::de::DeserializeOwned>(
            payload: Option<&Value>,
        ) -> Result<T, serde_json::Error> {
            let value = payload.cloned().unwrap_or(Value::Object(Default::default()));
            serde_json::from_value(value)
        }

        let msg = match kind {
            "register" => Self::Register(decode(payload)?),
            "getDevices" => Self::GetDevices,
            "getRooms" => Self::GetRooms,
            "getSnapshot" => Self::GetSnapshot,
            "help" => Self::Help,
            "subscribe" => Self::Subscribe(decode(payload)?),
            "unsubscribe" => Self::Unsubscribe(match payload {
                Some(p) => Some(serde_json::from_value(p.clone())?),
                None => None,
            }),
            "setState" => Self::SetState(decode(payload)?),
            "triggerScene" => Self::TriggerScene(decode(payload)?),
            "saveScene" => Self::SaveScene(decode(payload)?),
            "deleteScene" => Self::DeleteScene(decode(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Error codes carried in `error` frames
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotRegistered,
    InvalidMessage,
    UnknownType,
    InternalError,
    PermissionDenied,
    ResyncRequired,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ResyncRequired => "RESYNC_REQUIRED",
        }
    }
}

/// Body of an `error` frame
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Payload of the `registered` reply: assigned id plus server limits
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredPayload {
    pub client_id: String,
    pub max_msg_bytes: usize,
    pub max_events_per_second: u32,
    pub supports_batching: bool,
    pub supports_compression: bool,
    pub default_subscription: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DevicesPayload {
    pub devices: HashMap<String, Device>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomsPayload {
    pub rooms: HashMap<String, Room>,
}

/// Payload of a `stateChange` push, derived 1:1 from an external mutation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangePayload {
    pub device_id: String,
    pub capability: String,
    pub state: String,
    pub value: Value,
    pub timestamp: i64,
}

/// One coalesced metric update inside a batch entry
#[derive(Debug, Clone, Serialize)]
pub struct MetricUpdate {
    pub id: String,
    pub value: Value,
    pub ts: i64,
    pub status: MetricStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Buffered metric updates for one room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBatchEntry {
    pub room_id: String,
    pub metrics: Vec<MetricUpdate>,
}

/// One entry of the `help` catalog
#[derive(Debug, Clone, Serialize)]
pub struct HelpEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
    pub example: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct HelpPayload {
    pub messages: Vec<HelpEntry>,
}

/// Messages sent from server to client
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Registered(RegisteredPayload),
    Devices(DevicesPayload),
    Rooms(RoomsPayload),
    Snapshot(Snapshot),
    InitialSnapshot(Snapshot),
    Help(HelpPayload),
    Subscribed,
    Unsubscribed,
    Ack,
    StateChange(StateChangePayload),
    RoomMetricsUpdateBatch(Vec<MetricBatchEntry>),
    Error(ErrorBody),
}

impl ServerMessage {
    /// Wire name of this message type
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Registered(_) => "registered",
            ServerMessage::Devices(_) => "devices",
            ServerMessage::Rooms(_) => "rooms",
            ServerMessage::Snapshot(_) => "snapshot",
            ServerMessage::InitialSnapshot(_) => "initialSnapshot",
            ServerMessage::Help(_) => "help",
            ServerMessage::Subscribed => "subscribed",
            ServerMessage::Unsubscribed => "unsubscribed",
            ServerMessage::Ack => "ack",
            ServerMessage::StateChange(_) => "stateChange",
            ServerMessage::RoomMetricsUpdateBatch(_) => "roomMetricsUpdateBatch",
            ServerMessage::Error(_) => "error",
        }
    }
}

/// An outbound frame: a server message plus the request id it answers
/// (absent for pushes)
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub message: ServerMessage,
    pub request_id: Option<String>,
}

impl OutboundFrame {
    /// A response mirroring the request id
    pub fn reply(message: ServerMessage, request_id: Option<String>) -> Self {
        Self {
            message,
            request_id,
        }
    }

    /// An unsolicited push (no id)
    pub fn push(message: ServerMessage) -> Self {
        Self {
            message,
            request_id: None,
        }
    }

    /// An error frame
    pub fn error(code: ErrorCode, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            message: ServerMessage::Error(ErrorBody::new(code, message)),
            request_id,
        }
    }
}

impl Serialize for OutboundFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.message.kind())?;
        if let Some(id) = &self.request_id {
            map.serialize_entry("id", id)?;
        }
        match &self.message {
            ServerMessage::Registered(p) => map.serialize_entry("payload", p)?,
            ServerMessage::Devices(p) => map.serialize_entry("payload", p)?,
            ServerMessage::Rooms(p) => map.serialize_entry("payload", p)?,
            ServerMessage::Snapshot(p) => map.serialize_entry("payload", p)?,
            ServerMessage::InitialSnapshot(p) => map.serialize_entry("payload", p)?,
            ServerMessage::Help(p) => map.serialize_entry("payload", p)?,
            ServerMessage::StateChange(p) => map.serialize_entry("payload", p)?,
            ServerMessage::RoomMetricsUpdateBatch(p) => map.serialize_entry("payload", p)?,
            ServerMessage::Error(body) => map.serialize_entry("error", body)?,
            ServerMessage::Subscribed | ServerMessage::Unsubscribed | ServerMessage::Ack => {}
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_payload_parsing() {
        let p: RegisterPayload = serde_json::from_value(json!({
            "name": "Hearth Mobile",
            "version": "2.1.0",
            "clientType": "mobile",
            "lastSeqSeen": 17
        }))
        .unwrap();
        assert_eq!(p.client_type, ClientType::Mobile);
        assert_eq!(p.last_seq_seen, Some(17));
    }

    #[test]
    fn test_client_message_unknown_type() {
        let msg = ClientMessage::from_envelope("frobnicate", None).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn test_client_message_subscribe_defaults() {
        let msg = ClientMessage::from_envelope("subscribe", Some(&json!({}))).unwrap();
        match msg {
            Some(ClientMessage::Subscribe(f)) => assert!(f.is_empty()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_client_message_unsubscribe_absent_payload() {
        let msg = ClientMessage::from_envelope("unsubscribe", None).unwrap();
        assert!(matches!(msg, Some(ClientMessage::Unsubscribe(None))));
    }

    #[test]
    fn test_reply_frame_serialization() {
        let frame = OutboundFrame::reply(ServerMessage::Subscribed, Some("req-1".into()));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, json!({"type": "subscribed", "id": "req-1"}));
    }

    #[test]
    fn test_push_frame_omits_id() {
        let frame = OutboundFrame::push(ServerMessage::StateChange(StateChangePayload {
            device_id: "lamp1".into(),
            capability: "switch".into(),
            state: "zigbee.lamp1.on".into(),
            value: json!(true),
            timestamp: 1700000000000,
        }));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "stateChange");
        assert!(json.get("id").is_none());
        assert_eq!(json["payload"]["deviceId"], "lamp1");
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = OutboundFrame::error(ErrorCode::NotRegistered, "register first", None);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "NOT_REGISTERED");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_error_code_serialization() {
        assert_eq!(
            serde_json::to_value(ErrorCode::PermissionDenied).unwrap(),
            json!("PERMISSION_DENIED")
        );
        assert_eq!(ErrorCode::ResyncRequired.as_str(), "RESYNC_REQUIRED");
    }
}
