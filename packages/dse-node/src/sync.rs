//! Datasource lifecycle: persisted-record management and the periodic
//! synchronizer that converges hosted services onto the store's contents.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dse_core::types::{DatasourceRecord, DriverDescriptor};

use crate::error::DseError;
use crate::node::DseNode;
use crate::registry::ServiceSelector;
use crate::service::DataService;

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Services registered during the pass.
    pub added: usize,
    /// Services unregistered during the pass.
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// Record management
// ---------------------------------------------------------------------------

impl DseNode {
    /// Persists a new datasource record and brings its service up.
    ///
    /// The service is created directly rather than by scheduling a full
    /// [`DseNode::synchronize_datasources`] pass: the outcome for the bus is
    /// the same, but a creation failure is attributable to this record
    /// instead of being swallowed as a skipped record in a pass over all of
    /// them.
    ///
    /// The write is compensated: if the service cannot be created, the
    /// freshly persisted record is deleted again so the store never
    /// accumulates records without a working driver instantiation behind
    /// them.
    ///
    /// # Errors
    ///
    /// Validation errors from the driver schema; `DatasourceNameInUse` when
    /// the name collides with an existing record or any live service on the
    /// bus; `DatasourceCreationError` when instantiation fails after the
    /// record was persisted.
    pub async fn add_datasource(
        &self,
        name: &str,
        driver: &str,
        config: Map<String, Value>,
    ) -> Result<DatasourceRecord, DseError> {
        self.inner.drivers.validate_config(driver, &config)?;
        if self.is_valid_service(name) {
            return Err(DseError::DatasourceNameInUse {
                name: name.to_string(),
            });
        }

        let record = self
            .inner
            .store
            .add(DatasourceRecord::new(name, driver, config))
            .await?;
        info!(node_id = %self.node_id(), name, driver, ds_id = %record.id, "datasource added");

        if let Err(err) = self.create_datasource_service(&record).await {
            warn!(
                node_id = %self.node_id(),
                name,
                error = %err,
                "datasource service failed to start, deleting its record"
            );
            let _ = self.inner.store.delete(record.id).await;
            return Err(DseError::DatasourceCreationError {
                name: name.to_string(),
            });
        }
        Ok(record)
    }

    /// Deletes a datasource record and unregisters its service if hosted
    /// here.
    ///
    /// # Errors
    ///
    /// `DatasourceNotFound` when no record carries the id.
    pub async fn delete_datasource(&self, id: Uuid) -> Result<DatasourceRecord, DseError> {
        let record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| DseError::DatasourceNotFound { id: id.to_string() })?;
        self.inner.store.delete(id).await?;
        // Idempotent when the service lives on another node (or nowhere).
        self.inner
            .registry
            .unregister(ServiceSelector::DsId(id))
            .await?;
        info!(node_id = %self.node_id(), name = record.name, ds_id = %id, "datasource deleted");
        Ok(record)
    }

    /// Fetches one record, with secret options redacted unless asked not
    /// to.
    ///
    /// # Errors
    ///
    /// `DatasourceNotFound` on a missing id.
    pub async fn get_datasource(
        &self,
        id: Uuid,
        hide_secrets: bool,
    ) -> Result<DatasourceRecord, DseError> {
        let record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| DseError::DatasourceNotFound { id: id.to_string() })?;
        Ok(self.redact(record, hide_secrets))
    }

    /// All records, sorted by name, with secret options redacted unless
    /// asked not to.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn get_datasources(
        &self,
        hide_secrets: bool,
    ) -> Result<Vec<DatasourceRecord>, DseError> {
        let records = self.inner.store.list().await?;
        Ok(records
            .into_iter()
            .map(|record| self.redact(record, hide_secrets))
            .collect())
    }

    fn redact(&self, record: DatasourceRecord, hide_secrets: bool) -> DatasourceRecord {
        if !hide_secrets {
            return record;
        }
        // A record whose driver is no longer loaded has no schema to name
        // its secrets; it is returned as stored.
        match self.inner.drivers.get(&record.driver) {
            Ok(factory) => {
                let descriptor = factory.descriptor();
                record.with_config_redacted(descriptor.secret_options())
            }
            Err(_) => record,
        }
    }

    /// Schema of one loaded driver.
    ///
    /// # Errors
    ///
    /// `DriverNotFound` on an unloaded id.
    pub fn get_driver_info(&self, driver: &str) -> Result<DriverDescriptor, DseError> {
        Ok(self.inner.drivers.get(driver)?.descriptor())
    }

    /// Schemas of every loaded driver.
    #[must_use]
    pub fn get_drivers_info(&self) -> Vec<DriverDescriptor> {
        self.inner.drivers.descriptors()
    }

    /// Deletes records whose driver is no longer loaded. Run at startup so a
    /// node with a trimmed driver set does not keep resurrecting orphans.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn delete_missing_driver_datasources(&self) -> Result<usize, DseError> {
        let mut deleted = 0;
        for record in self.inner.store.list().await? {
            if self.inner.drivers.get(&record.driver).is_err() {
                warn!(
                    node_id = %self.node_id(),
                    name = record.name,
                    driver = record.driver,
                    "deleting datasource with unloaded driver"
                );
                self.inner.store.delete(record.id).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    /// One convergence pass: the set of locally hosted datasource services
    /// is driven toward the store's enabled records.
    ///
    /// Per-record instantiation failures are logged and skipped so one bad
    /// driver cannot stall the rest of the pass; unregistration failures
    /// propagate, since a service stuck half-stopped needs operator
    /// attention.
    ///
    /// # Errors
    ///
    /// Store failures and unregistration failures.
    pub async fn synchronize_datasources(&self) -> Result<SyncSummary, DseError> {
        let records = self.inner.store.list().await?;
        let known: HashSet<Uuid> = records.iter().map(|record| record.id).collect();
        let mut summary = SyncSummary::default();

        // Reclaim first: disabled records and services whose record is gone
        // (or was recreated under a fresh id).
        for record in &records {
            if !record.enabled && self.inner.registry.lookup_ds_id(record.id).is_some() {
                debug!(node_id = %self.node_id(), name = record.name, "unregistering disabled datasource");
                if self
                    .inner
                    .registry
                    .unregister(ServiceSelector::DsId(record.id))
                    .await?
                {
                    summary.removed += 1;
                }
            }
        }
        for hosted in self.inner.registry.services(true) {
            if !hosted.service().is_datasource() {
                continue;
            }
            let Some(ds_id) = hosted.service().ds_id() else {
                continue;
            };
            if !known.contains(&ds_id) {
                debug!(
                    node_id = %self.node_id(),
                    service_id = hosted.service().service_id(),
                    %ds_id,
                    "unregistering datasource service with no backing record"
                );
                if self
                    .inner
                    .registry
                    .unregister(ServiceSelector::DsId(ds_id))
                    .await?
                {
                    summary.removed += 1;
                }
            }
        }

        for record in &records {
            if record.enabled && self.inner.registry.lookup_ds_id(record.id).is_none() {
                match self.create_datasource_service(record).await {
                    Ok(()) => summary.added += 1,
                    Err(err) => {
                        warn!(
                            node_id = %self.node_id(),
                            name = record.name,
                            driver = record.driver,
                            error = %err,
                            "datasource service failed to start, skipping"
                        );
                    }
                }
            }
        }

        info!(
            node_id = %self.node_id(),
            added = summary.added,
            removed = summary.removed,
            "datasource synchronization pass complete"
        );
        Ok(summary)
    }

    /// Instantiates the service for `record` and registers it here.
    async fn create_datasource_service(&self, record: &DatasourceRecord) -> Result<(), DseError> {
        let factory = self.inner.drivers.get(&record.driver)?;
        let service: Arc<dyn DataService> = factory
            .instantiate(&record.name, record.id, &record.config)
            .await?;
        self.inner.registry.register(service).await
    }

    // -----------------------------------------------------------------------
    // Synchronizer lifecycle
    // -----------------------------------------------------------------------

    /// Starts the periodic synchronizer. The first pass runs immediately; a
    /// no-op when already running.
    pub async fn start_datasource_synchronizer(&self) {
        let mut worker = self.inner.sync_worker.lock().await;
        if worker.is_some() {
            return;
        }
        info!(
            node_id = %self.node_id(),
            interval_secs = self.inner.config.sync_interval.as_secs(),
            "starting datasource synchronizer"
        );
        *worker = Some(SyncWorker::spawn(
            self.clone(),
            self.inner.config.sync_interval,
        ));
    }

    /// Stops the periodic synchronizer and waits for it to exit. A no-op
    /// when it is not running.
    pub async fn stop_datasource_synchronizer(&self) {
        if let Some(worker) = self.inner.sync_worker.lock().await.take() {
            worker.stop().await;
        }
    }
}

// ---------------------------------------------------------------------------
// SyncWorker
// ---------------------------------------------------------------------------

/// Background task running [`DseNode::synchronize_datasources`] on an
/// interval until told to stop.
pub(crate) struct SyncWorker {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncWorker {
    pub(crate) fn spawn(node: DseNode, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = node.synchronize_datasources().await {
                            warn!(
                                node_id = %node.node_id(),
                                error = %err,
                                "datasource synchronization pass failed"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Self { shutdown, task }
    }

    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
