//! Self-describing protocol catalog served on `help`

use serde_json::json;

use super::messages::{HelpEntry, HelpPayload};

/// Catalog of every client message type with a worked example
pub fn catalog() -> HelpPayload {
    HelpPayload {
        messages: vec![
            HelpEntry {
                kind: "register",
                description: "Identify this client; required before any other message",
                example: json!({
                    "type": "register",
                    "id": "1",
                    "payload": {"name": "Hearth Mobile", "version": "2.1.0", "clientType": "mobile", "lastSeqSeen": 17}
                }),
            },
            HelpEntry {
                kind: "getDevices",
                description: "Fetch all devices with live capability values",
                example: json!({"type": "getDevices", "id": "2"}),
            },
            HelpEntry {
                kind: "getRooms",
                description: "Fetch all rooms with live metric values",
                example: json!({"type": "getRooms", "id": "3"}),
            },
            HelpEntry {
                kind: "getSnapshot",
                description: "Fetch devices and rooms as one sequence-numbered snapshot",
                example: json!({"type": "getSnapshot", "id": "4"}),
            },
            HelpEntry {
                kind: "subscribe",
                description: "Replace this connection's event filter; empty lists match everything",
                example: json!({
                    "type": "subscribe",
                    "id": "5",
                    "payload": {"deviceIds": ["lamp1"], "rooms": ["kitchen"], "capabilityTypes": ["switch"]}
                }),
            },
            HelpEntry {
                kind: "unsubscribe",
                description: "Remove entries from the filter, or clear it entirely when no payload is given",
                example: json!({
                    "type": "unsubscribe",
                    "id": "6",
                    "payload": {"deviceIds": ["lamp1"]}
                }),
            },
            HelpEntry {
                kind: "setState",
                description: "Write a capability value; the target must be a declared device capability",
                example: json!({
                    "type": "setState",
                    "id": "7",
                    "payload": {"deviceId": "lamp1", "capability": "switch", "state": "zigbee.lamp1.on", "value": true}
                }),
            },
            HelpEntry {
                kind: "triggerScene",
                description: "Activate a stored scene",
                example: json!({
                    "type": "triggerScene",
                    "id": "8",
                    "payload": {"sceneId": "movie-night"}
                }),
            },
            HelpEntry {
                kind: "saveScene",
                description: "Create or overwrite a scene definition",
                example: json!({
                    "type": "saveScene",
                    "id": "9",
                    "payload": {"sceneId": "movie-night", "scene": {"name": "Movie Night", "states": {}}}
                }),
            },
            HelpEntry {
                kind: "deleteScene",
                description: "Remove a stored scene",
                example: json!({
                    "type": "deleteScene",
                    "id": "10",
                    "payload": {"sceneId": "movie-night"}
                }),
            },
            HelpEntry {
                kind: "help",
                description: "This catalog",
                example: json!({"type": "help", "id": "11"}),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::codec;

    #[test]
    fn test_catalog_covers_all_client_types() {
        let payload = catalog();
        let kinds: Vec<&str> = payload.messages.iter().map(|m| m.kind).collect();
        for expected in [
            "register",
            "getDevices",
            "getRooms",
            "getSnapshot",
            "subscribe",
            "unsubscribe",
            "setState",
            "triggerScene",
            "saveScene",
            "deleteScene",
            "help",
        ] {
            assert!(kinds.contains(&expected), "missing catalog entry: {expected}");
        }
    }

    #[test]
    fn test_examples_pass_validation() {
        for entry in catalog().messages {
            let raw = entry.example.to_string();
            assert!(
                codec::validate(&raw).is_ok(),
                "example for `{}` does not validate",
                entry.kind
            );
        }
    }
}
