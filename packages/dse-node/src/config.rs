//! Node-level configuration.

use std::time::Duration;

/// Configuration for a DSE node.
///
/// Controls topic partitioning, RPC timeouts, and the datasource
/// synchronization schedule.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique id of the DSE bus this node participates in.
    pub bus_id: String,
    /// Partition namespace appended to every topic name. `None` falls back
    /// to `bus_id`.
    pub partition_id: Option<String>,
    /// Short timeout used to ping a destination before invoking an RPC on a
    /// service not known to be live.
    pub ping_timeout: Duration,
    /// Default timeout for potentially long-running requests such as
    /// datasource actions and large row queries.
    pub long_timeout: Duration,
    /// Interval between datasource synchronization passes.
    pub sync_interval: Duration,
    /// Fetch the legacy full-snapshot baseline on subscribe instead of the
    /// sequenced `(data, seqnum)` baseline.
    pub always_snapshot: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bus_id: "bus".to_string(),
            partition_id: None,
            ping_timeout: Duration::from_secs(5),
            long_timeout: Duration::from_secs(120),
            sync_interval: Duration::from_secs(60),
            always_snapshot: false,
        }
    }
}

impl NodeConfig {
    /// The effective partition id for all of this node's topics.
    #[must_use]
    pub fn partition(&self) -> &str {
        self.partition_id.as_deref().unwrap_or(&self.bus_id)
    }
}
