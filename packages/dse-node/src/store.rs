//! Persisted datasource registry boundary.
//!
//! The real store lives outside this crate (a database with its own
//! transactional guarantees); [`MemoryDatasourceStore`] is the in-process
//! implementation used by tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use dse_core::types::DatasourceRecord;

use crate::error::DseError;

// ---------------------------------------------------------------------------
// DatasourceStore trait
// ---------------------------------------------------------------------------

/// Pluggable persistence for datasource records.
#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<DatasourceRecord>, DseError>;

    async fn get(&self, id: Uuid) -> Result<Option<DatasourceRecord>, DseError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<DatasourceRecord>, DseError>;

    /// Persists a record.
    ///
    /// # Errors
    ///
    /// `DatasourceNameInUse` when another record already claims the name.
    async fn add(&self, record: DatasourceRecord) -> Result<DatasourceRecord, DseError>;

    /// Deletes a record; returns whether it existed.
    async fn delete(&self, id: Uuid) -> Result<bool, DseError>;
}

// ---------------------------------------------------------------------------
// MemoryDatasourceStore
// ---------------------------------------------------------------------------

/// In-memory [`DatasourceStore`]. The name-uniqueness check and insert
/// happen under one lock, standing in for the real store's transactional
/// guarantee.
#[derive(Default)]
pub struct MemoryDatasourceStore {
    records: RwLock<HashMap<Uuid, DatasourceRecord>>,
}

impl MemoryDatasourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasourceStore for MemoryDatasourceStore {
    async fn list(&self) -> Result<Vec<DatasourceRecord>, DseError> {
        let mut records: Vec<DatasourceRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DatasourceRecord>, DseError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<DatasourceRecord>, DseError> {
        Ok(self
            .records
            .read()
            .values()
            .find(|record| record.name == name)
            .cloned())
    }

    async fn add(&self, record: DatasourceRecord) -> Result<DatasourceRecord, DseError> {
        let mut records = self.records.write();
        if records.values().any(|existing| existing.name == record.name) {
            return Err(DseError::DatasourceNameInUse {
                name: record.name.clone(),
            });
        }
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DseError> {
        Ok(self.records.write().remove(&id).is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
