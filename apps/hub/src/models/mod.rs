//! Domain types for the Hearth hub
//!
//! Devices and rooms are not owned by this process; they are parsed on
//! demand from JSON-encoded entries in the external state store and cached
//! only for the duration of one snapshot build.

pub mod device;
pub mod room;

pub use device::{Capability, Device};
pub use room::{MetricStatus, Room, RoomMetric};

use std::collections::HashMap;

use serde::Serialize;

/// A full, sequence-numbered devices+rooms view assembled on demand
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub devices: HashMap<String, Device>,
    pub rooms: HashMap<String, Room>,
    pub seq: u64,
}
