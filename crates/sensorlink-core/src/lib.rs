//! Core types for sensorlink.
//!
//! This crate holds the device record and command shapes shared by the
//! storage and device crates, plus the service configuration.

pub mod config;
pub mod device;

pub use config::{
    BusKind, ConfigError, LogLevel, RecoveryPolicy, ServiceConfig, StoreKind, UpdateFormat,
};
pub use device::{
    CommandEnvelope, CommandKind, DeviceRecord, SetupCommand, UpdateCommand, PROTOCOL_MQTT,
    TABLE_NAME,
};
