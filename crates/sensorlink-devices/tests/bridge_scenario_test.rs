//! End-to-end bridge behavior over the in-process bus.

use std::sync::Arc;
use std::time::Duration;

use sensorlink_core::{DeviceRecord, RecoveryPolicy, ServiceConfig};
use sensorlink_devices::{MemoryBus, SensorService};
use sensorlink_storage::{MemorySensorStore, RecordFilter, SensorStore};
use serde_json::{json, Value};

/// Store whose inserts wait until the gate is released.
#[derive(Default)]
struct GatedStore {
    inner: MemorySensorStore,
    gate: parking_lot::Mutex<()>,
    entered: tokio::sync::Notify,
}

impl SensorStore for GatedStore {
    fn insert(&self, record: &DeviceRecord) -> sensorlink_storage::Result<String> {
        self.entered.notify_one();
        let _open = self.gate.lock();
        self.inner.insert(record)
    }

    fn update_by_id(&self, id: &str, record: &DeviceRecord) -> sensorlink_storage::Result<()> {
        self.inner.update_by_id(id, record)
    }

    fn find_one(&self, filter: &RecordFilter) -> sensorlink_storage::Result<Option<DeviceRecord>> {
        self.inner.find_one(filter)
    }

    fn fetch_all(&self) -> sensorlink_storage::Result<Vec<DeviceRecord>> {
        self.inner.fetch_all()
    }

    fn close(&self) -> sensorlink_storage::Result<()> {
        self.inner.close()
    }

    fn backend_name(&self) -> &'static str {
        "gated"
    }
}

fn config() -> ServiceConfig {
    ServiceConfig {
        switch_mac: Some("SWITCH1".to_string()),
        ..Default::default()
    }
}

async fn service(store: Arc<MemorySensorStore>, bus: Arc<MemoryBus>) -> SensorService {
    SensorService::with_adapters(config(), store, bus)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_hello_status_setup_flow() {
    let store = Arc::new(MemorySensorStore::new());
    let bus = Arc::new(MemoryBus::new());
    let _service = service(store.clone(), bus.clone()).await;

    // Hello creates exactly one record
    bus.deliver("/read/sensor/7/setup/hello", br#"{"mac":"AA:BB:CC"}"#)
        .await;
    let records = store.fetch_all().unwrap();
    assert_eq!(records.len(), 1);
    let id = records[0].storage_id.clone();
    assert!(!records[0].configured);
    assert_eq!(records[0].owner_id, "SWITCH1");

    // Status updates the same record and learns the topic
    let status = br#"{"mac":"AA:BB:CC","temperature":21}"#;
    bus.deliver("/read/sensor/7/status/dump", status).await;
    let record = store
        .find_one(&RecordFilter::new("AA:BB:CC", "SWITCH1"))
        .unwrap()
        .unwrap();
    assert_eq!(record.storage_id, id);
    assert_eq!(record.topic, "sensor/7");
    assert_eq!(record.temperature, 21);
    assert_eq!(store.len(), 1);

    // Setup reaches the sensor's write topic
    bus.deliver(
        "/write/switch/sensor/setup/config",
        br#"{"mac":"AA:BB:CC","group":3}"#,
    )
    .await;
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "/write/sensor/7/setup/config");
    let payload: Value = serde_json::from_str(&published[0].payload).unwrap();
    assert_eq!(
        payload,
        json!({"identifier": "AA:BB:CC", "group": 3, "cmdType": "setup"})
    );

    // Identical status causes no write
    bus.deliver("/read/sensor/7/status/dump", status).await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.fetch_all().unwrap()[0], record);
}

#[tokio::test]
async fn test_update_only_carries_set_fields() {
    let store = Arc::new(MemorySensorStore::new());
    let bus = Arc::new(MemoryBus::new());
    let _service = service(store.clone(), bus.clone()).await;

    bus.deliver("/read/sensor/2/status/dump", br#"{"mac":"AA:BB:CC"}"#)
        .await;
    bus.deliver(
        "/write/switch/sensor/update/settings",
        br#"{"mac":"AA:BB:CC","thresoldPresence":40}"#,
    )
    .await;

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "/write/sensor/2/update/settings");
    let payload: Value = serde_json::from_str(&published[0].payload).unwrap();
    assert_eq!(
        payload,
        json!({"identifier": "AA:BB:CC", "thresholdPresence": 40, "cmdType": "update"})
    );
}

#[tokio::test]
async fn test_command_for_unknown_sensor_is_dropped() {
    let store = Arc::new(MemorySensorStore::new());
    let bus = Arc::new(MemoryBus::new());
    let _service = service(store.clone(), bus.clone()).await;

    bus.deliver(
        "/write/switch/sensor/update/settings",
        br#"{"mac":"DD:EE:FF","group":1}"#,
    )
    .await;
    bus.deliver("/write/switch/sensor/setup/config", b"{broken").await;

    assert!(bus.published().is_empty());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_update_resolves_topic_from_store_after_restart() {
    let store = Arc::new(MemorySensorStore::new());

    let first_bus = Arc::new(MemoryBus::new());
    let first = service(store.clone(), first_bus.clone()).await;
    first_bus
        .deliver("/read/sensor/5/status/dump", br#"{"mac":"AA:BB:CC"}"#)
        .await;
    drop(first);

    // New process: empty registry, same store
    let bus = Arc::new(MemoryBus::new());
    let service = service(store.clone(), bus.clone()).await;
    assert!(service.registry().lock().await.is_empty());

    bus.deliver(
        "/write/switch/sensor/update/settings",
        br#"{"mac":"AA:BB:CC","isConfigured":true}"#,
    )
    .await;
    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "/write/sensor/5/update/settings");
}

#[tokio::test]
async fn test_restart_keeps_single_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensors.redb");

    let first_id = {
        let store = Arc::new(sensorlink_storage::RedbSensorStore::open(&path).unwrap());
        let bus = Arc::new(MemoryBus::new());
        let service = SensorService::with_adapters(config(), store.clone(), bus.clone())
            .await
            .unwrap();
        bus.deliver("/read/sensor/7/setup/hello", br#"{"mac":"AA:BB:CC"}"#)
            .await;
        service.stop().await;
        let reopened = sensorlink_storage::RedbSensorStore::open(&path).unwrap();
        let records = reopened.fetch_all().unwrap();
        assert_eq!(records.len(), 1);
        records[0].storage_id.clone()
    };

    let store = Arc::new(sensorlink_storage::RedbSensorStore::open(&path).unwrap());
    let bus = Arc::new(MemoryBus::new());
    let _service = SensorService::with_adapters(config(), store.clone(), bus.clone())
        .await
        .unwrap();
    bus.deliver("/read/sensor/7/status/dump", br#"{"mac":"AA:BB:CC"}"#)
        .await;

    let records = store.fetch_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].storage_id, first_id);
    assert_eq!(records[0].topic, "sensor/7");
}

#[tokio::test]
async fn test_carried_id_policy_duplicates_after_restart() {
    let store = Arc::new(MemorySensorStore::new());
    let config = ServiceConfig {
        recovery_policy: RecoveryPolicy::CarriedIdOnly,
        ..config()
    };

    for _ in 0..2 {
        let bus = Arc::new(MemoryBus::new());
        let _service = SensorService::with_adapters(config.clone(), store.clone(), bus.clone())
            .await
            .unwrap();
        bus.deliver("/read/sensor/7/setup/hello", br#"{"mac":"AA:BB:CC"}"#)
            .await;
    }

    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_store_one_record_per_sensor() {
    let store = Arc::new(MemorySensorStore::new());
    let bus = Arc::new(MemoryBus::new());
    let _service = service(store.clone(), bus.clone()).await;

    let mut deliveries = Vec::new();
    for n in 0..16 {
        let mac = format!("AA:BB:{:02X}", n);
        let hello = format!(r#"{{"mac":"{}"}}"#, mac);
        let status = format!(r#"{{"mac":"{}","temperature":{}}}"#, mac, n);

        let hello_bus = bus.clone();
        deliveries.push(tokio::spawn(async move {
            hello_bus
                .deliver("/read/sensor/1/setup/hello", hello.as_bytes())
                .await
        }));
        let status_bus = bus.clone();
        let status_topic = format!("/read/sensor/{}/status/dump", n);
        deliveries.push(tokio::spawn(async move {
            status_bus.deliver(&status_topic, status.as_bytes()).await
        }));
    }
    for delivery in deliveries {
        assert_eq!(delivery.await.unwrap(), 1);
    }

    assert_eq!(store.len(), 16);
    for n in 0..16 {
        let filter = RecordFilter::new(format!("AA:BB:{:02X}", n), "SWITCH1");
        assert!(store.find_one(&filter).unwrap().is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_setup_publishes_while_another_write_is_blocked() {
    let store = Arc::new(GatedStore::default());
    let bus = Arc::new(MemoryBus::new());
    let _service = SensorService::with_adapters(config(), store.clone(), bus.clone())
        .await
        .unwrap();

    bus.deliver("/read/sensor/2/status/dump", br#"{"mac":"BB"}"#)
        .await;
    // Consume the notification left by the insert for BB
    tokio::time::timeout(Duration::from_secs(2), store.entered.notified())
        .await
        .unwrap();

    let closed = store.gate.lock();
    let pending = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.deliver("/read/sensor/1/setup/hello", br#"{"mac":"AA"}"#)
                .await
        })
    };
    tokio::time::timeout(Duration::from_secs(2), store.entered.notified())
        .await
        .unwrap();

    tokio::time::timeout(
        Duration::from_millis(500),
        bus.deliver(
            "/write/switch/sensor/setup/config",
            br#"{"mac":"BB","group":1}"#,
        ),
    )
    .await
    .expect("setup waited on the blocked store write");

    let published = bus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "/write/sensor/2/setup/config");

    drop(closed);
    pending.await.unwrap();
    assert_eq!(store.fetch_all().unwrap().len(), 2);
}
