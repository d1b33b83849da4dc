//! Publish/subscribe bus adapters.
//!
//! The engine talks to the drivers bus only through [`BusAdapter`]: it hands
//! over the subscription patterns together with a [`MessageHandler`], and
//! publishes command payloads. Delivery of inbound messages may be
//! concurrent; handlers must be safe to call from several tasks at once.

use std::sync::Arc;

use async_trait::async_trait;
use sensorlink_core::{BusKind, ConfigError, ServiceConfig};

use crate::error::BusResult;

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use memory::{MemoryBus, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttBus, MqttBusConfig};

/// Receiver of inbound bus messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Failures are dealt with by the handler itself.
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Connection to a publish/subscribe bus.
#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// Subscribe to topic patterns (with `+`/`#` wildcards) and deliver
    /// matching messages to `handler`. Subscriptions survive reconnects.
    async fn subscribe(&self, patterns: Vec<String>, handler: Arc<dyn MessageHandler>) -> BusResult<()>;

    /// Publish a payload at most once, not retained.
    async fn publish(&self, topic: &str, payload: String) -> BusResult<()>;

    /// Drop every subscription and close the connection.
    async fn disconnect(&self) -> BusResult<()>;
}

/// Bus selection with its settings.
#[derive(Debug, Clone)]
pub enum BusBackend {
    /// MQTT broker connection.
    #[cfg(feature = "mqtt")]
    Mqtt(MqttBusConfig),
    /// In-process bus.
    Memory,
}

impl BusBackend {
    /// Backend described by the service configuration.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        match config.bus_backend {
            #[cfg(feature = "mqtt")]
            BusKind::Mqtt => Ok(Self::Mqtt(MqttBusConfig {
                host: config.drivers_broker_ip.clone(),
                port: config.broker_port()?,
                client_id: config.client_name(),
                username: config.drivers_broker_username.clone(),
                password: config.drivers_broker_password.clone(),
                ..Default::default()
            })),
            #[cfg(not(feature = "mqtt"))]
            BusKind::Mqtt => Err(ConfigError::Invalid(
                "mqtt bus support is not compiled in".to_string(),
            )),
            BusKind::Memory => Ok(Self::Memory),
        }
    }
}

/// Create a bus adapter. MQTT adapters start connecting in the background,
/// so this must be called from within a tokio runtime.
pub fn create_bus(backend: &BusBackend) -> Arc<dyn BusAdapter> {
    match backend {
        #[cfg(feature = "mqtt")]
        BusBackend::Mqtt(config) => Arc::new(MqttBus::connect(config.clone())),
        BusBackend::Memory => Arc::new(MemoryBus::new()),
    }
}

/// List available bus backends.
pub fn available_backends() -> Vec<&'static str> {
    let mut backends = vec!["memory"];
    #[cfg(feature = "mqtt")]
    backends.push("mqtt");
    backends
}
