//! In-memory registry of known sensors.
//!
//! The registry holds the last known record per sensor identifier. It is
//! written only by the reconciler and read by it and by topic resolution.
//! It has no locking of its own; callers share it as a [`SharedRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use sensorlink_core::DeviceRecord;
use tokio::sync::Mutex;

/// Registry shared between the reconciler and the command path.
pub type SharedRegistry = Arc<Mutex<SensorRegistry>>;

/// Map from device identifier to its last known record.
#[derive(Debug, Default, Clone)]
pub struct SensorRegistry {
    sensors: HashMap<String, DeviceRecord>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry ready to be shared.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Last known record for an identifier.
    pub fn lookup(&self, identifier: &str) -> Option<&DeviceRecord> {
        self.sensors.get(identifier)
    }

    /// Insert or overwrite the record for an identifier, returning the previous one.
    pub fn put(&mut self, identifier: impl Into<String>, record: DeviceRecord) -> Option<DeviceRecord> {
        self.sensors.insert(identifier.into(), record)
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
