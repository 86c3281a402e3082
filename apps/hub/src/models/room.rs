//! Room and room-metric types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Freshness status of a metric value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    #[default]
    Ok,
    Nodata,
}

impl MetricStatus {
    /// A metric with no usable value reports `nodata`
    pub fn from_value(value: &Value) -> Self {
        if value.is_null() {
            Self::Nodata
        } else {
            Self::Ok
        }
    }
}

/// A sensor-like external state surfaced as part of a room's telemetry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoomMetric {
    /// Unique within the room after normalization; back-filled from the
    /// state id (or type) when the config omits it
    #[serde(default)]
    pub id: String,

    /// Display label; back-filled from the type (or id) when omitted
    #[serde(default)]
    pub label: String,

    /// External state id this metric reads
    pub state: String,

    /// Metric type, e.g. "temperature", "humidity"
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Live value resolved from the store at snapshot time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,

    #[serde(default)]
    pub status: MetricStatus,
}

impl RoomMetric {
    /// Back-fill `id` and `label` so the rest of the system can always key
    /// on `id`: id falls back to the state id, then the type; label falls
    /// back to the type, then the id.
    pub fn normalize(&mut self) {
        if self.id.is_empty() {
            self.id = if !self.state.is_empty() {
                self.state.clone()
            } else {
                self.kind.clone().unwrap_or_default()
            };
        }
        if self.label.is_empty() {
            self.label = self.kind.clone().unwrap_or_else(|| self.id.clone());
        }
    }
}

/// A room as stored in the external configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Room {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default)]
    pub metrics: Vec<RoomMetric>,
}

impl Room {
    /// Normalize all metrics and drop duplicates by normalized id
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        for metric in &mut self.metrics {
            metric.normalize();
        }
        self.metrics.retain(|m| seen.insert(m.id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metric_id_backfill_from_state() {
        let mut m: RoomMetric = serde_json::from_value(json!({
            "state": "zigbee.sensor1.temp",
            "type": "temperature"
        }))
        .unwrap();
        m.normalize();
        assert_eq!(m.id, "zigbee.sensor1.temp");
        assert_eq!(m.label, "temperature");
    }

    #[test]
    fn test_metric_label_backfill_from_id() {
        let mut m = RoomMetric {
            id: "t1".into(),
            state: "s".into(),
            ..Default::default()
        };
        m.normalize();
        assert_eq!(m.label, "t1");
    }

    #[test]
    fn test_room_deduplicates_metric_ids() {
        let mut room: Room = serde_json::from_value(json!({
            "id": "kitchen",
            "name": "Kitchen",
            "metrics": [
                {"state": "a.temp", "type": "temperature"},
                {"state": "a.temp", "type": "temperature"},
                {"state": "a.hum", "type": "humidity"}
            ]
        }))
        .unwrap();
        room.normalize();
        assert_eq!(room.metrics.len(), 2);
    }

    #[test]
    fn test_metric_status_from_value() {
        assert_eq!(MetricStatus::from_value(&json!(null)), MetricStatus::Nodata);
        assert_eq!(MetricStatus::from_value(&json!(22.5)), MetricStatus::Ok);
    }
}
