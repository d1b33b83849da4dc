//! Sensor service lifecycle.
//!
//! Wires the record store, the bus adapter, the registry, the reconciler,
//! the forwarder and the router together, and tears them down on stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sensorlink_core::ServiceConfig;
use sensorlink_storage::{create_store, SensorStore, StoreBackend};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{create_bus, BusAdapter, BusBackend};
use crate::error::BridgeError;
use crate::forwarder::CommandForwarder;
use crate::reconcile::Reconciler;
use crate::registry::{SensorRegistry, SharedRegistry};
use crate::router::MessageRouter;

/// A running sensor bridge.
pub struct SensorService {
    owner_id: String,
    registry: SharedRegistry,
    store: Arc<dyn SensorStore>,
    bus: Arc<dyn BusAdapter>,
    router: Arc<MessageRouter>,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl SensorService {
    /// Open the store and the bus described by `config`, then subscribe.
    pub async fn initialize(config: ServiceConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        info!("Starting Sensor service");

        let store_backend = StoreBackend::from_config(&config);
        let store = create_store(&store_backend).map_err(|e| {
            error!("Cannot open sensor store: {}", e);
            e
        })?;
        if !config.database_ip.is_empty() {
            debug!(
                "Ignoring database address {}:{}, using {} store",
                config.database_ip,
                config.database_port,
                store.backend_name()
            );
        }

        let bus = create_bus(&BusBackend::from_config(&config)?);
        Self::with_adapters(config, store, bus).await
    }

    /// Build the service over existing adapters.
    pub async fn with_adapters(
        config: ServiceConfig,
        store: Arc<dyn SensorStore>,
        bus: Arc<dyn BusAdapter>,
    ) -> Result<Self, BridgeError> {
        let owner_id = config.owner_id();
        let registry = SensorRegistry::shared();

        let reconciler = Arc::new(
            Reconciler::new(registry.clone(), store.clone()).with_policy(config.recovery_policy),
        );
        let forwarder = CommandForwarder::new(bus.clone()).with_update_format(config.update_format);
        let router = Arc::new(MessageRouter::new(reconciler, forwarder, owner_id.clone()));

        bus.subscribe(router.subscriptions(), router.clone()).await?;
        info!(
            "Sensor service ready (switch {}, {} store, {} bus)",
            owner_id,
            store.backend_name(),
            bus.name()
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            owner_id,
            registry,
            store,
            bus,
            router,
            stopped: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SensorStore> {
        &self.store
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Wait until [`SensorService::stop`] is called.
    pub async fn run(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            warn!("Shutdown channel closed");
        }
    }

    /// Unsubscribe, disconnect and close the store. Later calls do nothing.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping Sensor service");

        if let Err(e) = self.bus.disconnect().await {
            warn!("Error disconnecting from bus: {}", e);
        }
        if let Err(e) = self.store.close() {
            warn!("Error closing sensor store: {}", e);
        }
        self.shutdown_tx.send_replace(true);
        info!("Sensor service stopped");
    }
}
