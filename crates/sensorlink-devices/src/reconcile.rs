//! Reconciliation of device reports with the registry and the record store.
//!
//! A report is merged into the registry first and written to the store only
//! when it differs from the last known record. Before writing, the store is
//! asked for an existing record with the same (identifier, owner) so that a
//! restarted process updates the record it created earlier instead of
//! inserting a second one.

use std::collections::HashMap;
use std::sync::Arc;

use sensorlink_core::{DeviceRecord, RecoveryPolicy};
use sensorlink_storage::{RecordFilter, SensorStore};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::registry::SharedRegistry;

/// What a reconciliation did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Report equal to the registry entry; nothing written.
    Unchanged,
    /// New record created with this storage id.
    Inserted(String),
    /// Existing record with this storage id replaced.
    Updated(String),
}

impl ReconcileOutcome {
    /// Storage id written, if any.
    pub fn storage_id(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::Unchanged => None,
            ReconcileOutcome::Inserted(id) | ReconcileOutcome::Updated(id) => Some(id),
        }
    }
}

/// Merges reports into the registry and the store.
///
/// The registry lock is only held to read and stage entries. Store calls run
/// on the blocking pool without it, so a slow store stalls only the reports
/// for the sensor being written. Reports for one sensor are reconciled one
/// at a time so that two of them cannot both insert.
pub struct Reconciler {
    registry: SharedRegistry,
    store: Arc<dyn SensorStore>,
    policy: RecoveryPolicy,
    in_flight: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler {
    pub fn new(registry: SharedRegistry, store: Arc<dyn SensorStore>) -> Self {
        Self {
            registry,
            store,
            policy: RecoveryPolicy::default(),
            in_flight: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Set when the store is consulted for an existing record id.
    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Lock serializing reconciliations of one sensor.
    fn identity_slot(&self, identifier: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .entry(identifier.to_string())
            .or_default()
            .clone()
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> sensorlink_storage::Result<T>
    where
        F: FnOnce(&dyn SensorStore) -> sensorlink_storage::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| sensorlink_storage::Error::Storage(format!("store task failed: {}", e)))?
    }

    /// Merge a report.
    ///
    /// Any storage id in the report is ignored; the id comes from the
    /// registry or the store. On a store failure the report stays staged in
    /// the registry with the id carried from the previous entry (none for a
    /// first report), and the next differing report retries the write.
    pub async fn reconcile(&self, mut report: DeviceRecord) -> Result<ReconcileOutcome, BridgeError> {
        if report.identifier.is_empty() {
            return Err(BridgeError::Decode("sensor identifier is empty".to_string()));
        }

        let slot = self.identity_slot(&report.identifier);
        let _serial = slot.lock().await;

        let mut storage_id = {
            let mut registry = self.registry.lock().await;
            let carried = match registry.lookup(&report.identifier) {
                Some(known) => {
                    report.storage_id = known.storage_id.clone();
                    if *known == report {
                        debug!("Sensor {} unchanged, skipping store write", report.identifier);
                        return Ok(ReconcileOutcome::Unchanged);
                    }
                    known.storage_id.clone()
                }
                None => {
                    report.storage_id.clear();
                    String::new()
                }
            };
            registry.put(report.identifier.clone(), report.clone());
            carried
        };

        let recover = match self.policy {
            RecoveryPolicy::Always => true,
            RecoveryPolicy::CarriedIdOnly => !storage_id.is_empty(),
        };
        if recover {
            let filter = RecordFilter::for_record(&report);
            match self.with_store(move |store| store.find_one(&filter)).await {
                Ok(Some(stored)) if stored.is_persisted() => {
                    if stored.storage_id != storage_id {
                        debug!(
                            "Sensor {} recovered stored id {}",
                            report.identifier, stored.storage_id
                        );
                    }
                    storage_id = stored.storage_id;
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "Cannot look up stored record for sensor {}: {}",
                    report.identifier, e
                ),
            }
        }

        report.storage_id = storage_id.clone();
        let record = report.clone();
        let outcome = if storage_id.is_empty() {
            let id = self.with_store(move |store| store.insert(&record)).await?;
            report.storage_id = id.clone();
            ReconcileOutcome::Inserted(id)
        } else {
            let id = storage_id.clone();
            self.with_store(move |store| store.update_by_id(&id, &record))
                .await?;
            ReconcileOutcome::Updated(storage_id)
        };

        self.registry
            .lock()
            .await
            .put(report.identifier.clone(), report);
        Ok(outcome)
    }

    /// Last known record for a sensor: the registry first, then the store
    /// by (identifier, owner). A store hit is not added to the registry.
    pub async fn lookup(
        &self,
        identifier: &str,
        owner_id: &str,
    ) -> Result<Option<DeviceRecord>, BridgeError> {
        let known = self.registry.lock().await.lookup(identifier).cloned();
        if known.is_some() {
            return Ok(known);
        }

        let filter = RecordFilter::new(identifier, owner_id);
        self.with_store(move |store| store.find_one(&filter))
            .await
            .map_err(BridgeError::Lookup)
    }

    /// Current device topic of a sensor.
    pub async fn resolve_topic(&self, identifier: &str, owner_id: &str) -> Result<String, BridgeError> {
        match self.lookup(identifier, owner_id).await? {
            Some(record) if !record.topic.is_empty() => Ok(record.topic),
            _ => Err(BridgeError::UnknownDevice(identifier.to_string())),
        }
    }
}
