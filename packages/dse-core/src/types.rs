//! Shared domain types: datasource records, driver descriptors, and the
//! peer-presence status view.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Placeholder substituted for secret configuration values when records are
/// listed with redaction enabled.
pub const REDACTED: &str = "<hidden>";

// ---------------------------------------------------------------------------
// Driver schema
// ---------------------------------------------------------------------------

/// Kind of a configuration option a driver declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSpec {
    /// Must be supplied when creating a datasource.
    Required,
    Optional,
    /// Optional, and redacted when records are listed.
    Secret,
}

/// Static description of a loadable driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Globally unique driver identifier.
    pub id: String,
    pub description: String,
    /// Declared configuration schema: option name -> kind.
    pub config: BTreeMap<String, OptionSpec>,
}

impl DriverDescriptor {
    /// Option names declared `Required`.
    pub fn required_options(&self) -> impl Iterator<Item = &str> {
        self.config
            .iter()
            .filter(|(_, spec)| **spec == OptionSpec::Required)
            .map(|(name, _)| name.as_str())
    }

    /// Option names declared `Secret`.
    pub fn secret_options(&self) -> impl Iterator<Item = &str> {
        self.config
            .iter()
            .filter(|(_, spec)| **spec == OptionSpec::Secret)
            .map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Datasource records
// ---------------------------------------------------------------------------

/// Persisted configuration describing one driver-backed service instance.
///
/// A record with `enabled = true` implies exactly one live hosted service with
/// `service_id == name` and internal id equal to `id`; the datasource
/// synchronizer maintains that equivalence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceRecord {
    pub id: Uuid,
    /// Unique, human-facing name; doubles as the hosted service id.
    pub name: String,
    pub driver: String,
    pub config: Map<String, Value>,
    pub description: String,
    pub enabled: bool,
}

impl DatasourceRecord {
    /// Builds an enabled record with a fresh id and empty description.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        driver: impl Into<String>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            driver: driver.into(),
            config,
            description: String::new(),
            enabled: true,
        }
    }

    /// Returns a copy with the named configuration options redacted.
    #[must_use]
    pub fn with_config_redacted<'a>(mut self, options: impl IntoIterator<Item = &'a str>) -> Self {
        for option in options {
            if let Some(value) = self.config.get_mut(option) {
                *value = Value::String(REDACTED.to_string());
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Peer-presence view
// ---------------------------------------------------------------------------

/// What one peer node advertises on the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Service ids hosted by the peer.
    pub services: Vec<String>,
    /// Tables the peer's services subscribe to, keyed by publisher id.
    pub subscribed_tables: HashMap<String, BTreeSet<String>>,
}

/// Latest observation of bus-wide peer status, supplied by the peer-presence
/// collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DseStatus {
    pub peers: HashMap<String, PeerInfo>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
