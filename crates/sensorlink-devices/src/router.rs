//! Inbound message routing.
//!
//! Four routes are served: sensor hello and status reports feed the
//! reconciler, operator setup and update requests go through topic
//! resolution to the command forwarder. Every handler decodes its payload
//! before touching any state, so a malformed message changes nothing.

use std::sync::Arc;

use async_trait::async_trait;
use sensorlink_core::{DeviceRecord, SetupCommand, UpdateCommand, PROTOCOL_MQTT};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::bus::MessageHandler;
use crate::error::BridgeError;
use crate::forwarder::CommandForwarder;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::topic;

/// Kind of inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Hello,
    Status,
    Setup,
    Update,
}

/// A subscription pattern and the handler kind serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub pattern: &'static str,
    pub kind: RouteKind,
}

/// Routing table, in match order.
pub fn routes() -> Vec<Route> {
    vec![
        Route {
            pattern: topic::HELLO_TOPIC,
            kind: RouteKind::Hello,
        },
        Route {
            pattern: topic::STATUS_TOPIC,
            kind: RouteKind::Status,
        },
        Route {
            pattern: topic::SETUP_COMMAND_TOPIC,
            kind: RouteKind::Setup,
        },
        Route {
            pattern: topic::UPDATE_COMMAND_TOPIC,
            kind: RouteKind::Update,
        },
    ]
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A sensor report was reconciled.
    Reconciled(ReconcileOutcome),
    /// A command was published on this topic.
    Forwarded(String),
}

/// Dispatches bus messages to the reconciler and the command forwarder.
pub struct MessageRouter {
    reconciler: Arc<Reconciler>,
    forwarder: CommandForwarder,
    owner_id: String,
    routes: Vec<Route>,
}

impl MessageRouter {
    /// Create a router for sensors owned by `owner_id`.
    pub fn new(reconciler: Arc<Reconciler>, forwarder: CommandForwarder, owner_id: impl Into<String>) -> Self {
        Self {
            reconciler,
            forwarder,
            owner_id: owner_id.into(),
            routes: routes(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Patterns to subscribe to on the bus.
    pub fn subscriptions(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.pattern.to_string()).collect()
    }

    /// Route kind for a topic, if any.
    pub fn route_for(&self, topic_name: &str) -> Option<RouteKind> {
        self.routes
            .iter()
            .find(|r| topic::matches(r.pattern, topic_name))
            .map(|r| r.kind)
    }

    /// Handle one message and report what it did.
    pub async fn dispatch(&self, topic_name: &str, payload: &[u8]) -> Result<HandleOutcome, BridgeError> {
        match self.route_for(topic_name) {
            Some(RouteKind::Hello) => self.on_hello(payload).await.map(HandleOutcome::Reconciled),
            Some(RouteKind::Status) => self
                .on_status(topic_name, payload)
                .await
                .map(HandleOutcome::Reconciled),
            Some(RouteKind::Setup) => self.on_setup(payload).await.map(HandleOutcome::Forwarded),
            Some(RouteKind::Update) => self.on_update(payload).await.map(HandleOutcome::Forwarded),
            None => Err(BridgeError::NoRoute(topic_name.to_string())),
        }
    }

    /// A sensor announced itself. It is recorded as not configured.
    pub async fn on_hello(&self, payload: &[u8]) -> Result<ReconcileOutcome, BridgeError> {
        let mut report: DeviceRecord = decode(payload)?;
        report.configured = false;
        report.protocol = PROTOCOL_MQTT.to_string();
        report.owner_id = self.owner_id.clone();

        let identifier = report.identifier.clone();
        let outcome = self.reconciler.reconcile(report).await?;
        info!("New Sensor driver {} stored on database", identifier);
        Ok(outcome)
    }

    /// A sensor sent its status. Its device topic is taken from the topic.
    pub async fn on_status(&self, topic_name: &str, payload: &[u8]) -> Result<ReconcileOutcome, BridgeError> {
        let device_topic = topic::device_topic_from_status(topic_name)
            .ok_or_else(|| BridgeError::Decode(format!("malformed status topic {}", topic_name)))?;

        let mut report: DeviceRecord = decode(payload)?;
        report.owner_id = self.owner_id.clone();
        report.protocol = PROTOCOL_MQTT.to_string();
        report.topic = device_topic;

        let outcome = self.reconciler.reconcile(report).await?;
        if let Some(id) = outcome.storage_id() {
            debug!("Sensor status stored as {}", id);
        }
        Ok(outcome)
    }

    /// Forward an operator setup request to the sensor.
    pub async fn on_setup(&self, payload: &[u8]) -> Result<String, BridgeError> {
        let command: SetupCommand = decode(payload)?;
        let device_topic = self
            .reconciler
            .resolve_topic(&command.identifier, &self.owner_id)
            .await?;
        let url = self.forwarder.send_setup(&device_topic, &command).await?;
        info!("New configuration has been sent to {}", command.identifier);
        Ok(url)
    }

    /// Forward an operator settings update to the sensor.
    pub async fn on_update(&self, payload: &[u8]) -> Result<String, BridgeError> {
        let command: UpdateCommand = decode(payload)?;
        let device_topic = self
            .reconciler
            .resolve_topic(&command.identifier, &self.owner_id)
            .await?;
        let url = self.forwarder.send_update(&device_topic, &command).await?;
        info!("New update has been sent to {}", command.identifier);
        Ok(url)
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, BridgeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Log a failed message at the level its kind calls for.
fn log_failure(topic_name: &str, err: &BridgeError) {
    match err {
        BridgeError::Decode(_) => error!("Error during parsing message on {}: {}", topic_name, err),
        BridgeError::UnknownDevice(_) => warn!("{}", err),
        BridgeError::Store(_) => error!("Error during database update: {}", err),
        BridgeError::Lookup(_) => error!("Cannot look up sensor for {}: {}", topic_name, err),
        BridgeError::Publish(_) => error!("Cannot send command: {}", err),
        BridgeError::NoRoute(_) => debug!("{}", err),
        BridgeError::Config(_) => error!("{}", err),
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn handle(&self, topic_name: &str, payload: &[u8]) {
        debug!(
            "Received topic: {} payload: {}",
            topic_name,
            String::from_utf8_lossy(payload)
        );
        if let Err(e) = self.dispatch(topic_name, payload).await {
            log_failure(topic_name, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::registry::SensorRegistry;
    use sensorlink_storage::{MemorySensorStore, SensorStore};
    use tokio::test;

    fn router() -> (Arc<MemorySensorStore>, Arc<MemoryBus>, MessageRouter) {
        let store = Arc::new(MemorySensorStore::new());
        let bus = Arc::new(MemoryBus::new());
        let reconciler = Arc::new(Reconciler::new(SensorRegistry::shared(), store.clone()));
        let router = MessageRouter::new(reconciler, CommandForwarder::new(bus.clone()), "SWITCH1");
        (store, bus, router)
    }

    #[test]
    async fn test_route_table() {
        let (_, _, router) = router();
        assert_eq!(router.subscriptions().len(), 4);
        assert_eq!(
            router.route_for("/read/sensor/3/setup/hello"),
            Some(RouteKind::Hello)
        );
        assert_eq!(
            router.route_for("/write/switch/sensor/update/settings"),
            Some(RouteKind::Update)
        );
        assert_eq!(router.route_for("/read/led/3/status/dump"), None);
    }

    #[test]
    async fn test_hello_overrides_reported_fields() {
        let (store, _, router) = router();

        let payload = br#"{"mac":"AA:BB:CC","isConfigured":true,"protocol":"ZIGBEE","switchMac":"OTHER"}"#;
        router.on_hello(payload).await.unwrap();

        let stored = store.fetch_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!stored[0].configured);
        assert_eq!(stored[0].protocol, "MQTT");
        assert_eq!(stored[0].owner_id, "SWITCH1");
    }

    #[test]
    async fn test_malformed_payload_changes_nothing() {
        let (store, _, router) = router();

        let result = router.dispatch("/read/sensor/7/status/dump", b"not json").await;
        assert!(matches!(result, Err(BridgeError::Decode(_))));
        assert!(store.is_empty());
        assert!(router.reconciler().registry().lock().await.is_empty());
    }

    #[test]
    async fn test_short_status_topic_is_decode_error() {
        let (store, _, router) = router();
        let result = router.on_status("/read/sensor", br#"{"mac":"AA:BB:CC"}"#).await;
        assert!(matches!(result, Err(BridgeError::Decode(_))));
        assert!(store.is_empty());
    }

    #[test]
    async fn test_unknown_device_publishes_nothing() {
        let (_, bus, router) = router();

        let result = router
            .dispatch(topic::SETUP_COMMAND_TOPIC, br#"{"mac":"DD:EE:FF","group":2}"#)
            .await;
        assert!(matches!(result, Err(BridgeError::UnknownDevice(_))));
        assert!(bus.published().is_empty());
    }

    #[test]
    async fn test_unrouted_topic() {
        let (_, _, router) = router();
        let result = router.dispatch("/read/led/1/status/dump", b"{}").await;
        assert!(matches!(result, Err(BridgeError::NoRoute(_))));
    }
}
