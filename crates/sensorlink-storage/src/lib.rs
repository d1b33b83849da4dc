//! Record store adapter for sensorlink.
//!
//! Persists sensor [`DeviceRecord`](sensorlink_core::DeviceRecord)s behind
//! the [`SensorStore`] trait, with a redb backend for production and an
//! in-memory backend for tests.

pub mod backends;
pub mod error;
pub mod sensor_store;

pub use backends::{available_backends, create_store, MemorySensorStore, RedbSensorStore, StoreBackend};
pub use error::{Error, Result};
pub use sensor_store::{RecordFilter, SensorStore};
