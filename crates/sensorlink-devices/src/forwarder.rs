//! Outbound configuration commands.

use std::sync::Arc;

use sensorlink_core::{CommandEnvelope, CommandKind, SetupCommand, UpdateCommand, UpdateFormat};
use serde::Serialize;
use tracing::{error, info};

use crate::bus::BusAdapter;
use crate::error::{BridgeError, BusError};
use crate::topic;

/// Publishes configuration commands on a sensor's write topic.
pub struct CommandForwarder {
    bus: Arc<dyn BusAdapter>,
    update_format: UpdateFormat,
}

impl CommandForwarder {
    pub fn new(bus: Arc<dyn BusAdapter>) -> Self {
        Self {
            bus,
            update_format: UpdateFormat::default(),
        }
    }

    /// Set how update commands are encoded.
    pub fn with_update_format(mut self, format: UpdateFormat) -> Self {
        self.update_format = format;
        self
    }

    /// Serialize `payload` and publish it on `/write/<device_topic>/<suffix of kind>`.
    ///
    /// Returns the topic published on.
    pub async fn send<T: Serialize + Sync>(
        &self,
        device_topic: &str,
        kind: CommandKind,
        payload: &T,
    ) -> Result<String, BridgeError> {
        let url = topic::command_topic(device_topic, kind);
        let dump = serde_json::to_string(payload)
            .map_err(|e| BusError::Serialization(e.to_string()))?;

        if let Err(e) = self.bus.publish(&url, dump.clone()).await {
            error!("Cannot send {} command on {}: {}", kind, url, e);
            return Err(e.into());
        }

        info!("Command {} sent on topic: {} dump: {}", kind, url, dump);
        Ok(url)
    }

    /// Send a setup command, tagged with `cmdType: "setup"`.
    pub async fn send_setup(&self, device_topic: &str, command: &SetupCommand) -> Result<String, BridgeError> {
        let envelope = CommandEnvelope::new(command, CommandKind::Setup);
        self.send(device_topic, CommandKind::Setup, &envelope).await
    }

    /// Send an update command in the configured format.
    pub async fn send_update(&self, device_topic: &str, command: &UpdateCommand) -> Result<String, BridgeError> {
        match self.update_format {
            UpdateFormat::Tagged => {
                let envelope = CommandEnvelope::new(command, CommandKind::Update);
                self.send(device_topic, CommandKind::Update, &envelope).await
            }
            UpdateFormat::Bare => self.send(device_topic, CommandKind::Update, command).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use serde_json::{json, Value};
    use tokio::test;

    fn update() -> UpdateCommand {
        UpdateCommand {
            identifier: "AA:BB:CC".to_string(),
            group: Some(4),
            ..Default::default()
        }
    }

    #[test]
    async fn test_send_setup() {
        let bus = Arc::new(MemoryBus::new());
        let forwarder = CommandForwarder::new(bus.clone());

        let command = SetupCommand {
            identifier: "AA:BB:CC".to_string(),
            friendly_name: Some("hall".to_string()),
            ..Default::default()
        };
        let url = forwarder.send_setup("sensor/7", &command).await.unwrap();
        assert_eq!(url, "/write/sensor/7/setup/config");

        let published = bus.published();
        assert_eq!(published.len(), 1);
        let value: Value = serde_json::from_str(&published[0].payload).unwrap();
        assert_eq!(
            value,
            json!({"identifier": "AA:BB:CC", "friendlyName": "hall", "cmdType": "setup"})
        );
    }

    #[test]
    async fn test_update_formats() {
        let bus = Arc::new(MemoryBus::new());

        CommandForwarder::new(bus.clone())
            .send_update("sensor/7", &update())
            .await
            .unwrap();
        CommandForwarder::new(bus.clone())
            .with_update_format(UpdateFormat::Bare)
            .send_update("sensor/7", &update())
            .await
            .unwrap();

        let published = bus.published();
        let tagged: Value = serde_json::from_str(&published[0].payload).unwrap();
        let bare: Value = serde_json::from_str(&published[1].payload).unwrap();
        assert_eq!(tagged["cmdType"], "update");
        assert_eq!(bare, json!({"identifier": "AA:BB:CC", "group": 4}));
        assert_eq!(published[1].topic, "/write/sensor/7/update/settings");
    }

    #[test]
    async fn test_publish_failure() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_fail_publish(true);
        let forwarder = CommandForwarder::new(bus.clone());

        let result = forwarder.send_update("sensor/7", &update()).await;
        assert!(matches!(result, Err(BridgeError::Publish(_))));
    }
}
