//! Driver loading and datasource configuration validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use dse_core::types::{DriverDescriptor, OptionSpec};

use crate::error::DseError;
use crate::service::DataService;

// ---------------------------------------------------------------------------
// DriverFactory trait
// ---------------------------------------------------------------------------

/// A loadable driver: describes its configuration schema and instantiates
/// driver-backed services from datasource records.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    fn descriptor(&self) -> DriverDescriptor;

    /// Builds the service for one datasource record. `config` is the
    /// record's merged configuration; `ds_id` becomes the service's stable
    /// internal id.
    async fn instantiate(
        &self,
        name: &str,
        ds_id: Uuid,
        config: &Map<String, Value>,
    ) -> anyhow::Result<Arc<dyn DataService>>;
}

impl std::fmt::Debug for dyn DriverFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverFactory")
            .field("id", &self.descriptor().id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DriverRegistry
// ---------------------------------------------------------------------------

/// Drivers loaded at node startup. Immutable afterward.
#[derive(Debug)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Loads the configured drivers, checking for id conflicts.
    ///
    /// # Errors
    ///
    /// `BadConfig` if two factories declare the same driver id. No node
    /// should come up with an ambiguous driver set.
    pub fn load(
        factories: impl IntoIterator<Item = Arc<dyn DriverFactory>>,
    ) -> Result<Self, DseError> {
        let mut drivers: BTreeMap<String, Arc<dyn DriverFactory>> = BTreeMap::new();
        for factory in factories {
            let id = factory.descriptor().id;
            if drivers.insert(id.clone(), factory).is_some() {
                return Err(DseError::BadConfig(format!(
                    "a driver with id '{id}' is already loaded"
                )));
            }
        }
        Ok(Self { drivers })
    }

    /// Looks up a loaded driver.
    ///
    /// # Errors
    ///
    /// `DriverNotFound` when no driver with that id is loaded.
    pub fn get(&self, driver: &str) -> Result<&Arc<dyn DriverFactory>, DseError> {
        self.drivers.get(driver).ok_or_else(|| DseError::DriverNotFound {
            driver: driver.to_string(),
        })
    }

    /// Descriptors of every loaded driver.
    #[must_use]
    pub fn descriptors(&self) -> Vec<DriverDescriptor> {
        self.drivers
            .values()
            .map(|factory| factory.descriptor())
            .collect()
    }

    /// Validates a proposed datasource configuration against the driver's
    /// declared schema.
    ///
    /// # Errors
    ///
    /// `InvalidDriver` when no loaded driver matches; `InvalidDriverOption`
    /// when the config carries keys outside the schema;
    /// `MissingRequiredConfigOptions` when required keys are absent.
    pub fn validate_config(
        &self,
        driver: &str,
        config: &Map<String, Value>,
    ) -> Result<(), DseError> {
        let Some(factory) = self.drivers.get(driver) else {
            return Err(DseError::InvalidDriver {
                driver: driver.to_string(),
            });
        };
        let descriptor = factory.descriptor();

        let invalid: Vec<String> = config
            .keys()
            .filter(|key| !descriptor.config.contains_key(*key))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(DseError::InvalidDriverOption { options: invalid });
        }

        let missing: Vec<String> = descriptor
            .config
            .iter()
            .filter(|(_, spec)| **spec == OptionSpec::Required)
            .map(|(name, _)| name.clone())
            .filter(|name| !config.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(DseError::MissingRequiredConfigOptions { options: missing });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
