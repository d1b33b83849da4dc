//! Sensor bridge engine.
//!
//! Keeps the stored sensor records in step with the reports sensors publish
//! on the drivers bus, and forwards operator configuration commands to the
//! sensor they address.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  hello/status   ┌───────────────┐   ┌────────────┐
//! │ BusAdapter│ ──────────────→ │ MessageRouter │ → │ Reconciler │ → SensorStore
//! │ (MQTT)    │  setup/update   │               │   │ + Registry │
//! │           │ ←────────────── │  Forwarder    │ ← │ topic      │
//! └───────────┘   /write/...    └───────────────┘   └────────────┘
//! ```

pub mod bus;
pub mod error;
pub mod forwarder;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod service;
pub mod topic;

pub use bus::{available_backends, create_bus, BusAdapter, BusBackend, MemoryBus, MessageHandler};
#[cfg(feature = "mqtt")]
pub use bus::{MqttBus, MqttBusConfig};
pub use error::{BridgeError, BusError, BusResult};
pub use forwarder::CommandForwarder;
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use registry::{SensorRegistry, SharedRegistry};
pub use router::{routes, HandleOutcome, MessageRouter, Route, RouteKind};
pub use service::SensorService;
