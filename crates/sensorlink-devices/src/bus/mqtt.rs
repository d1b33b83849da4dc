//! MQTT bus adapter.
//!
//! A background task drives the rumqttc event loop. Every registered
//! pattern is subscribed again on each `ConnAck`, so subscriptions survive
//! broker restarts and link loss. Inbound publishes are handed to the
//! handler on their own task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BusAdapter, MessageHandler};
use crate::error::{BusError, BusResult};

/// MQTT connection settings.
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep alive interval in seconds
    pub keep_alive: u64,
    /// Pause before polling again after a connection error
    pub retry_delay: Duration,
}

impl Default for MqttBusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "Sensor".to_string(),
            username: None,
            password: None,
            keep_alive: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl MqttBusConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

/// State shared with the event loop task.
struct Shared {
    client: AsyncClient,
    patterns: RwLock<Vec<String>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    connected: AtomicBool,
    running: AtomicBool,
}

/// Bus adapter over an MQTT broker.
pub struct MqttBus {
    shared: Arc<Shared>,
    broker_addr: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Create the client and start connecting in the background.
    pub fn connect(config: MqttBusConfig) -> Self {
        let broker_addr = format!("{}:{}", config.host, config.port);
        let (client, eventloop) = AsyncClient::new(config.options(), 64);

        let shared = Arc::new(Shared {
            client,
            patterns: RwLock::new(Vec::new()),
            handler: RwLock::new(None),
            connected: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let task = tokio::spawn(Self::run_event_loop(
            eventloop,
            shared.clone(),
            config.retry_delay,
        ));

        info!(
            "MQTT client {} connecting to {}",
            config.client_id, broker_addr
        );

        Self {
            shared,
            broker_addr,
            task: Mutex::new(Some(task)),
        }
    }

    /// Whether the broker has acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn run_event_loop(mut eventloop: EventLoop, shared: Arc<Shared>, retry_delay: Duration) {
        while shared.running.load(Ordering::SeqCst) {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Client connected");
                    shared.connected.store(true, Ordering::SeqCst);
                    let patterns = shared.patterns.read().clone();
                    for pattern in patterns {
                        Self::subscribe_pattern(&shared.client, &pattern).await;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let handler = shared.handler.read().clone();
                    match handler {
                        Some(handler) => {
                            tokio::spawn(async move {
                                handler.handle(&publish.topic, &publish.payload).await;
                            });
                        }
                        None => debug!("Dropping message on {}, no handler", publish.topic),
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    shared.connected.store(false, Ordering::SeqCst);
                }
                Ok(_) => {}
                Err(e) => {
                    shared.connected.store(false, Ordering::SeqCst);
                    if !shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    error!("Connection lost, reason: {}", e);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    async fn subscribe_pattern(client: &AsyncClient, pattern: &str) {
        match client.subscribe(pattern, QoS::AtMostOnce).await {
            Ok(()) => debug!("Subscribed to {}", pattern),
            Err(e) => warn!("Failed to subscribe to {}: {}", pattern, e),
        }
    }
}

#[async_trait]
impl BusAdapter for MqttBus {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn subscribe(&self, patterns: Vec<String>, handler: Arc<dyn MessageHandler>) -> BusResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(BusError::Stopped);
        }

        *self.shared.handler.write() = Some(handler);
        self.shared.patterns.write().extend(patterns.iter().cloned());

        // Not connected yet: the ConnAck handler subscribes everything
        if self.is_connected() {
            for pattern in &patterns {
                Self::subscribe_pattern(&self.shared.client, pattern).await;
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> BusResult<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(BusError::Stopped);
        }
        self.shared
            .client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BusError::Communication(format!("{} on {}", e, self.broker_addr)))
    }

    async fn disconnect(&self) -> BusResult<()> {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        let patterns = std::mem::take(&mut *self.shared.patterns.write());
        if self.is_connected() {
            for pattern in patterns {
                if let Err(e) = self.shared.client.unsubscribe(pattern.as_str()).await {
                    warn!("Failed to unsubscribe from {}: {}", pattern, e);
                }
            }
            if let Err(e) = self.shared.client.disconnect().await {
                warn!("Failed to disconnect from {}: {}", self.broker_addr, e);
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);

        // Let the event loop flush the disconnect, then stop it
        let abort = task.abort_handle();
        if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
            debug!("MQTT event loop did not stop in time, aborting");
            abort.abort();
        }
        info!("Disconnected from {}", self.broker_addr);
        Ok(())
    }
}
