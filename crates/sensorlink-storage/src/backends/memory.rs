//! In-memory storage backend.
//!
//! Not persistent. Used for dry runs and tests.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use sensorlink_core::DeviceRecord;

use crate::sensor_store::{with_storage_id, RecordFilter, SensorStore};
use crate::{Error, Result};

/// Sensor record store held in process memory.
#[derive(Default)]
pub struct MemorySensorStore {
    /// (storage id, record) in insertion order
    records: RwLock<Vec<(String, DeviceRecord)>>,
    closed: AtomicBool,
}

impl MemorySensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

impl SensorStore for MemorySensorStore {
    fn insert(&self, record: &DeviceRecord) -> Result<String> {
        self.ensure_open()?;
        if record.identifier.is_empty() {
            return Err(Error::InvalidInput("identifier cannot be empty".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.records
            .write()
            .push((id.clone(), with_storage_id(record, &id)));
        Ok(id)
    }

    fn update_by_id(&self, id: &str, record: &DeviceRecord) -> Result<()> {
        self.ensure_open()?;
        let mut records = self.records.write();
        let slot = records
            .iter_mut()
            .find(|(key, _)| key == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if slot.1.identifier != record.identifier || slot.1.owner_id != record.owner_id {
            return Err(Error::InvalidInput(format!(
                "record {} belongs to {}/{}",
                id, slot.1.identifier, slot.1.owner_id
            )));
        }
        slot.1 = with_storage_id(record, id);
        Ok(())
    }

    fn find_one(&self, filter: &RecordFilter) -> Result<Option<DeviceRecord>> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .iter()
            .find(|(_, record)| filter.matches(record))
            .map(|(_, record)| record.clone()))
    }

    fn fetch_all(&self) -> Result<Vec<DeviceRecord>> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .iter()
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
