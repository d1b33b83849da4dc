//! Record store interface for sensor devices.
//!
//! Every backend persists [`DeviceRecord`] documents keyed by a
//! store-assigned id and supports one secondary lookup: the
//! (`identifier`, `owner_id`) pair.

use sensorlink_core::DeviceRecord;

use crate::Result;

/// Secondary lookup key for a device record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordFilter {
    pub identifier: String,
    pub owner_id: String,
}

impl RecordFilter {
    pub fn new(identifier: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Filter matching the given record's identity.
    pub fn for_record(record: &DeviceRecord) -> Self {
        Self::new(record.identifier.clone(), record.owner_id.clone())
    }

    pub fn matches(&self, record: &DeviceRecord) -> bool {
        record.identifier == self.identifier && record.owner_id == self.owner_id
    }
}

/// Persistent collection of sensor device records.
///
/// Calls block until the backend answers. Records returned by the store
/// always carry their store id in `storage_id`.
pub trait SensorStore: Send + Sync {
    /// Insert a new record and return the id assigned to it.
    fn insert(&self, record: &DeviceRecord) -> Result<String>;

    /// Replace the record stored under `id`.
    fn update_by_id(&self, id: &str, record: &DeviceRecord) -> Result<()>;

    /// Find the record for an (identifier, owner) pair.
    fn find_one(&self, filter: &RecordFilter) -> Result<Option<DeviceRecord>>;

    /// All stored records.
    fn fetch_all(&self) -> Result<Vec<DeviceRecord>>;

    /// Release the backend. Further calls fail with [`crate::Error::Closed`].
    fn close(&self) -> Result<()>;

    /// Backend type identifier.
    fn backend_name(&self) -> &'static str;
}

/// Copy of `record` carrying `id` as its storage id.
pub(crate) fn with_storage_id(record: &DeviceRecord, id: &str) -> DeviceRecord {
    let mut stored = record.clone();
    stored.storage_id = id.to_string();
    stored
}
