//! Storage backend implementations.
//!
//! The set of backends is closed; [`create_store`] maps a [`StoreBackend`]
//! to one of them so callers only ever see `Arc<dyn SensorStore>`.

use std::path::PathBuf;
use std::sync::Arc;

use sensorlink_core::{ServiceConfig, StoreKind};

use crate::sensor_store::SensorStore;
use crate::Result;

pub mod memory;
pub mod redb;

pub use memory::MemorySensorStore;
pub use redb::RedbSensorStore;

/// Backend selection with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Persistent redb file.
    Redb { path: PathBuf },
    /// Process memory, lost on exit.
    Memory,
}

impl StoreBackend {
    /// Backend described by the service configuration.
    pub fn from_config(config: &ServiceConfig) -> Self {
        match config.store_backend {
            StoreKind::Redb => Self::Redb {
                path: PathBuf::from(&config.database_path),
            },
            StoreKind::Memory => Self::Memory,
        }
    }
}

/// Create a store for the given backend.
///
/// # Example
/// ```no_run
/// use sensorlink_storage::backends::{create_store, StoreBackend};
///
/// # fn main() -> sensorlink_storage::Result<()> {
/// let store = create_store(&StoreBackend::Redb {
///     path: "./data/sensors.redb".into(),
/// })?;
/// assert_eq!(store.backend_name(), "redb");
/// # Ok(())
/// # }
/// ```
pub fn create_store(backend: &StoreBackend) -> Result<Arc<dyn SensorStore>> {
    match backend {
        StoreBackend::Redb { path } => Ok(Arc::new(RedbSensorStore::open(path)?)),
        StoreBackend::Memory => Ok(Arc::new(MemorySensorStore::new())),
    }
}

/// Backend type identifiers.
pub fn available_backends() -> Vec<&'static str> {
    vec!["redb", "memory"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_backends() {
        assert_eq!(available_backends(), vec!["redb", "memory"]);
    }

    #[test]
    fn test_create_memory_store() {
        let store = create_store(&StoreBackend::Memory).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = ServiceConfig::default();
        config.database_path = "/tmp/sensors.redb".to_string();
        assert_eq!(
            StoreBackend::from_config(&config),
            StoreBackend::Redb {
                path: PathBuf::from("/tmp/sensors.redb")
            }
        );

        config.store_backend = StoreKind::Memory;
        assert_eq!(StoreBackend::from_config(&config), StoreBackend::Memory);
    }
}
