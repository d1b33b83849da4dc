//! Redb storage backend implementation.
//!
//! Provides persistent storage for sensor records using the redb embedded
//! database. Records live in one table; a second table indexes them by
//! (identifier, owner) and is written in the same transaction.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use sensorlink_core::{DeviceRecord, TABLE_NAME};

use crate::sensor_store::{with_storage_id, RecordFilter, SensorStore};
use crate::{Error, Result};

// Records table: key = storage id, value = DeviceRecord (JSON)
const RECORDS_TABLE: TableDefinition<&str, &str> = TableDefinition::new(TABLE_NAME);

// Key index table: key = (identifier, owner_id), value = storage id
const KEY_INDEX_TABLE: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("sensors_by_key");

/// Sensor record store backed by a redb file.
pub struct RedbSensorStore {
    db: RwLock<Option<Database>>,
    path: PathBuf,
}

impl RedbSensorStore {
    /// Open or create a store at the given path, creating parent directories
    /// and tables as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        // Opening a table in a write transaction creates it when missing
        let write_txn = db.begin_write()?;
        {
            let _records = write_txn.open_table(RECORDS_TABLE)?;
            let _index = write_txn.open_table(KEY_INDEX_TABLE)?;
        }
        write_txn.commit()?;

        tracing::debug!("Opened sensor store at {}", path_ref.display());

        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path_ref.to_path_buf(),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(Error::Closed),
        }
    }
}

impl SensorStore for RedbSensorStore {
    fn insert(&self, record: &DeviceRecord) -> Result<String> {
        if record.identifier.is_empty() {
            return Err(Error::InvalidInput("identifier cannot be empty".to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let stored = with_storage_id(record, &id);
        let json = serde_json::to_string(&stored)?;

        self.with_db(|db| {
            let write_txn = db.begin_write()?;
            {
                let mut records = write_txn.open_table(RECORDS_TABLE)?;
                records.insert(id.as_str(), json.as_str())?;

                // The first record inserted for a key stays the one found by lookups
                let mut index = write_txn.open_table(KEY_INDEX_TABLE)?;
                let key = (record.identifier.as_str(), record.owner_id.as_str());
                let existing = index.get(key)?.map(|v| v.value().to_string());
                match existing {
                    Some(other) => tracing::warn!(
                        "Sensor {} already stored as {}, inserted duplicate {}",
                        record.identifier,
                        other,
                        id
                    ),
                    None => {
                        index.insert(key, id.as_str())?;
                    }
                }
            }
            write_txn.commit()?;
            Ok(())
        })?;

        Ok(id)
    }

    fn update_by_id(&self, id: &str, record: &DeviceRecord) -> Result<()> {
        self.with_db(|db| {
            let write_txn = db.begin_write()?;
            {
                let mut records = write_txn.open_table(RECORDS_TABLE)?;

                let current: DeviceRecord = match records.get(id)? {
                    Some(value) => serde_json::from_str(value.value())?,
                    None => return Err(Error::NotFound(id.to_string())),
                };
                if current.identifier != record.identifier || current.owner_id != record.owner_id
                {
                    return Err(Error::InvalidInput(format!(
                        "record {} belongs to {}/{}",
                        id, current.identifier, current.owner_id
                    )));
                }

                let json = serde_json::to_string(&with_storage_id(record, id))?;
                records.insert(id, json.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
    }

    fn find_one(&self, filter: &RecordFilter) -> Result<Option<DeviceRecord>> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let index = read_txn.open_table(KEY_INDEX_TABLE)?;

            let id = match index.get((filter.identifier.as_str(), filter.owner_id.as_str()))? {
                Some(value) => value.value().to_string(),
                None => return Ok(None),
            };

            let records = read_txn.open_table(RECORDS_TABLE)?;
            match records.get(id.as_str())? {
                Some(value) => {
                    let record: DeviceRecord = serde_json::from_str(value.value())?;
                    Ok(Some(with_storage_id(&record, &id)))
                }
                None => Ok(None),
            }
        })
    }

    fn fetch_all(&self) -> Result<Vec<DeviceRecord>> {
        self.with_db(|db| {
            let read_txn = db.begin_read()?;
            let records = read_txn.open_table(RECORDS_TABLE)?;

            let mut all = Vec::new();
            for result in records.iter()? {
                let (key, value) = result?;
                match serde_json::from_str::<DeviceRecord>(value.value()) {
                    Ok(record) => all.push(with_storage_id(&record, key.value())),
                    Err(e) => tracing::warn!("Skipping unreadable record {}: {}", key.value(), e),
                }
            }
            Ok(all)
        })
    }

    fn close(&self) -> Result<()> {
        if self.db.write().take().is_some() {
            tracing::debug!("Closed sensor store at {}", self.path.display());
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_store() -> (tempfile::TempDir, RedbSensorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbSensorStore::open(dir.path().join("sensors.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_and_find() {
        let (_dir, store) = create_temp_store();

        let record = DeviceRecord::new("AA:BB:CC").with_owner("SWITCH1");
        let id = store.insert(&record).unwrap();
        assert!(!id.is_empty());

        let found = store
            .find_one(&RecordFilter::new("AA:BB:CC", "SWITCH1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.storage_id, id);
        assert_eq!(found.owner_id, "SWITCH1");

        assert!(store
            .find_one(&RecordFilter::new("AA:BB:CC", "SWITCH2"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_by_id() {
        let (_dir, store) = create_temp_store();

        let mut record = DeviceRecord::new("AA:BB:CC").with_owner("SWITCH1");
        let id = store.insert(&record).unwrap();

        record.topic = "sensor/7".to_string();
        store.update_by_id(&id, &record).unwrap();

        let found = store
            .find_one(&RecordFilter::for_record(&record))
            .unwrap()
            .unwrap();
        assert_eq!(found.topic, "sensor/7");
        assert_eq!(store.fetch_all().unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_id() {
        let (_dir, store) = create_temp_store();
        let record = DeviceRecord::new("AA:BB:CC");
        let result = store.update_by_id("missing", &record);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_update_cannot_change_identity() {
        let (_dir, store) = create_temp_store();
        let id = store
            .insert(&DeviceRecord::new("AA:BB:CC").with_owner("SWITCH1"))
            .unwrap();

        let other = DeviceRecord::new("DD:EE:FF").with_owner("SWITCH1");
        assert!(matches!(
            store.update_by_id(&id, &other),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let (_dir, store) = create_temp_store();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.fetch_all(), Err(Error::Closed)));
    }
}
