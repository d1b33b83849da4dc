//! Error types for the device bridge.

use sensorlink_core::ConfigError;
use thiserror::Error;

/// Result type for bus adapter operations.
pub type BusResult<T> = Result<T, BusError>;

/// Error type for message bus adapters.
#[derive(Debug, Error)]
pub enum BusError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Communication error
    #[error("Communication error: {0}")]
    Communication(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Adapter stopped
    #[error("Bus adapter is stopped")]
    Stopped,

    /// Other error
    #[error("Bus error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Failures of the reconciliation and routing engine.
///
/// None of these stop the service; the router logs them and moves on.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Malformed inbound payload or topic. Nothing was changed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// No registry entry and no stored record with a topic for this sensor.
    #[error("Sensor {0} not found")]
    UnknownDevice(String),

    /// Store insert or update failed.
    #[error("Store error: {0}")]
    Store(#[from] sensorlink_storage::Error),

    /// Store read failed while resolving a sensor for a command.
    #[error("Store lookup error: {0}")]
    Lookup(#[source] sensorlink_storage::Error),

    /// Outbound command could not be published.
    #[error("Publish error: {0}")]
    Publish(#[from] BusError),

    /// No route handles this topic.
    #[error("No route for topic {0}")]
    NoRoute(String),

    /// Invalid service configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Decode(e.to_string())
    }
}

impl BridgeError {
    /// Only configuration problems prevent the service from starting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::UnknownDevice("AA:BB:CC".to_string());
        assert_eq!(err.to_string(), "Sensor AA:BB:CC not found");

        let err = BridgeError::from(BusError::Communication("send failed".to_string()));
        assert!(err.to_string().contains("send failed"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_decode_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(BridgeError::from(json_err), BridgeError::Decode(_)));
    }

    #[test]
    fn test_config_is_fatal() {
        let err = BridgeError::from(ConfigError::Invalid("port".to_string()));
        assert!(err.is_fatal());
    }
}
