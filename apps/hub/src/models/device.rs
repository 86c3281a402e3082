//! Device and capability types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, typed control/readout surface of a device, bound to one
/// external state id
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Capability {
    /// Capability type, e.g. "switch", "brightness", "temperature"
    #[serde(rename = "type")]
    pub kind: String,

    /// External state id this capability reads/writes
    pub state: String,

    /// Live value resolved from the store at snapshot time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverted: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A device as stored in the external configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Device {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub room: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl Device {
    /// Find the capability matching a `(capability type, state id)` pair
    pub fn find_capability(&self, kind: &str, state_id: &str) -> Option<&Capability> {
        self.capabilities
            .iter()
            .find(|c| c.kind == kind && c.state == state_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lamp() -> Device {
        serde_json::from_value(json!({
            "id": "lamp1",
            "name": "Desk Lamp",
            "type": "light",
            "room": "office",
            "capabilities": [
                {"type": "switch", "state": "zigbee.lamp1.on"},
                {"type": "brightness", "state": "zigbee.lamp1.level", "min_value": 0.0, "max_value": 100.0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_device() {
        let d = lamp();
        assert_eq!(d.id, "lamp1");
        assert_eq!(d.kind, "light");
        assert_eq!(d.capabilities.len(), 2);
        assert_eq!(d.capabilities[1].max_value, Some(100.0));
    }

    #[test]
    fn test_find_capability() {
        let d = lamp();
        assert!(d.find_capability("switch", "zigbee.lamp1.on").is_some());
        assert!(d.find_capability("switch", "zigbee.lamp1.level").is_none());
        assert!(d.find_capability("color", "zigbee.lamp1.on").is_none());
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let d: Device = serde_json::from_value(json!({
            "id": "x",
            "someVendorExtension": true
        }))
        .unwrap();
        assert_eq!(d.id, "x");
    }
}
