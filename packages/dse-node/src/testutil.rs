//! Test doubles shared across the crate's unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use dse_core::types::{DriverDescriptor, OptionSpec};

use crate::drivers::DriverFactory;
use crate::service::DataService;

/// Opt-in log output for tests: honors `RUST_LOG`, safe to call from every
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One `receive_data` delivery observed by a [`FakeDataSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPublish {
    pub publisher: String,
    pub table: String,
    pub data: Value,
    pub seqnum: Option<u64>,
    pub is_snapshot: bool,
}

/// Scriptable [`DataService`] that records everything delivered to it.
pub struct FakeDataSource {
    service_id: String,
    ds_id: Option<Uuid>,
    last_published: Mutex<HashMap<String, (Value, u64)>>,
    received: Mutex<Vec<ReceivedPublish>>,
    first_subs_events: Mutex<Vec<BTreeSet<String>>>,
    no_subs_events: Mutex<Vec<BTreeSet<String>>>,
}

impl FakeDataSource {
    pub fn new(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            ds_id: None,
            last_published: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            first_subs_events: Mutex::new(Vec::new()),
            no_subs_events: Mutex::new(Vec::new()),
        }
    }

    /// Marks this fake as driver-backed with the given stable id.
    pub fn with_ds_id(mut self, ds_id: Uuid) -> Self {
        self.ds_id = Some(ds_id);
        self
    }

    /// Seeds the last-published state for `table`.
    pub fn publish_local(&self, table: &str, data: Value, seqnum: u64) {
        self.last_published
            .lock()
            .insert(table.to_string(), (data, seqnum));
    }

    pub fn received(&self) -> Vec<ReceivedPublish> {
        self.received.lock().clone()
    }

    pub fn first_subs_events(&self) -> Vec<BTreeSet<String>> {
        self.first_subs_events.lock().clone()
    }

    pub fn no_subs_events(&self) -> Vec<BTreeSet<String>> {
        self.no_subs_events.lock().clone()
    }
}

#[async_trait]
impl DataService for FakeDataSource {
    fn service_id(&self) -> &str {
        &self.service_id
    }

    fn ds_id(&self) -> Option<Uuid> {
        self.ds_id
    }

    fn is_datasource(&self) -> bool {
        self.ds_id.is_some()
    }

    async fn get_snapshot(&self, table: &str) -> Result<Value, crate::error::DseError> {
        Ok(self
            .last_published
            .lock()
            .get(table)
            .map_or_else(|| json!([]), |(data, _)| data.clone()))
    }

    async fn get_last_published(
        &self,
        table: &str,
    ) -> Result<(Value, u64), crate::error::DseError> {
        Ok(self
            .last_published
            .lock()
            .get(table)
            .cloned()
            .unwrap_or_else(|| (json!([]), 0)))
    }

    async fn receive_data(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
        seqnum: Option<u64>,
        is_snapshot: bool,
    ) {
        self.received.lock().push(ReceivedPublish {
            publisher: publisher.to_string(),
            table: table.to_string(),
            data,
            seqnum,
            is_snapshot,
        });
    }

    fn on_first_subs(&self, tables: &BTreeSet<String>) {
        self.first_subs_events.lock().push(tables.clone());
    }

    fn on_no_subs(&self, tables: &BTreeSet<String>) {
        self.no_subs_events.lock().push(tables.clone());
    }
}

/// [`DriverFactory`] double with a configurable option schema. Instantiates
/// [`FakeDataSource`] services carrying the record's `ds_id`.
pub struct FakeDriver {
    id: String,
    options: BTreeMap<String, OptionSpec>,
}

impl FakeDriver {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, name: &str, spec: OptionSpec) -> Self {
        self.options.insert(name.to_string(), spec);
        self
    }
}

#[async_trait]
impl DriverFactory for FakeDriver {
    fn descriptor(&self) -> DriverDescriptor {
        DriverDescriptor {
            id: self.id.clone(),
            description: format!("fake driver '{}'", self.id),
            config: self.options.clone(),
        }
    }

    async fn instantiate(
        &self,
        name: &str,
        ds_id: Uuid,
        _config: &Map<String, Value>,
    ) -> anyhow::Result<Arc<dyn DataService>> {
        Ok(Arc::new(FakeDataSource::new(name).with_ds_id(ds_id)))
    }
}
