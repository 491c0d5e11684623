//! Transport target construction for the DSE bus.
//!
//! Pure functions mapping a logical destination (the node control channel, or
//! a named service) plus an optional partition id to a transport target
//! descriptor. Partitioning is purely a topic-name suffix: two nodes with
//! different partition ids share nothing, including liveness probes and
//! subscriptions, even on the same transport.

use serde::{Deserialize, Serialize};

/// Single fixed exchange for the whole deployment.
pub const EXCHANGE: &str = "dse";

/// Base topic for node-level control endpoints.
pub const CONTROL_TOPIC: &str = "dse-control";

/// Prefix for service-level topics; the full topic is the prefix followed by
/// the service id.
pub const SERVICE_TOPIC_PREFIX: &str = "dse-service-";

/// Protocol version stamped on every target.
pub const RPC_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// RpcTarget
// ---------------------------------------------------------------------------

/// Destination descriptor handed to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTarget {
    pub exchange: String,
    pub topic: String,
    pub version: String,
    pub namespace: Option<String>,
    /// Server-affinity id: routes to one specific member of the topic
    /// instead of the topic's full membership.
    pub server: Option<String>,
    /// Deliver to every member of the topic, collecting no response.
    pub fanout: bool,
}

impl RpcTarget {
    /// The transport-level registration key for this target.
    #[must_use]
    pub fn key(&self) -> TargetKey {
        TargetKey {
            exchange: self.exchange.clone(),
            topic: self.topic.clone(),
        }
    }
}

/// Key under which servers register with the transport: targets with the same
/// exchange and topic form one delivery group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetKey {
    pub exchange: String,
    pub topic: String,
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

/// Appends the partition id to a base topic name, if a partition is set.
#[must_use]
pub fn partitioned_topic(topic: &str, partition: Option<&str>) -> String {
    match partition {
        Some(partition) => format!("{topic}-{partition}"),
        None => topic.to_string(),
    }
}

/// Target for a node-level control endpoint.
#[must_use]
pub fn node_target(partition: Option<&str>, server: Option<&str>, fanout: bool) -> RpcTarget {
    RpcTarget {
        exchange: EXCHANGE.to_string(),
        topic: partitioned_topic(CONTROL_TOPIC, partition),
        version: RPC_VERSION.to_string(),
        namespace: None,
        server: server.map(ToString::to_string),
        fanout,
    }
}

/// Target for a service-level endpoint.
#[must_use]
pub fn service_target(
    service_id: &str,
    partition: Option<&str>,
    server: Option<&str>,
    fanout: bool,
) -> RpcTarget {
    let topic = format!("{SERVICE_TOPIC_PREFIX}{service_id}");
    RpcTarget {
        exchange: EXCHANGE.to_string(),
        topic: partitioned_topic(&topic, partition),
        version: RPC_VERSION.to_string(),
        namespace: None,
        server: server.map(ToString::to_string),
        fanout,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_target_without_partition_uses_bare_control_topic() {
        let target = node_target(None, None, false);
        assert_eq!(target.exchange, EXCHANGE);
        assert_eq!(target.topic, "dse-control");
        assert_eq!(target.version, RPC_VERSION);
        assert!(target.server.is_none());
        assert!(!target.fanout);
    }

    #[test]
    fn node_target_with_partition_appends_suffix() {
        let target = node_target(Some("bus-a"), None, false);
        assert_eq!(target.topic, "dse-control-bus-a");
    }

    #[test]
    fn service_target_prefixes_service_id() {
        let target = service_target("nova", None, None, false);
        assert_eq!(target.topic, "dse-service-nova");
    }

    #[test]
    fn service_target_with_partition_and_affinity() {
        let target = service_target("nova", Some("bus-a"), Some("node-1"), false);
        assert_eq!(target.topic, "dse-service-nova-bus-a");
        assert_eq!(target.server.as_deref(), Some("node-1"));
    }

    #[test]
    fn fanout_flag_carried_through() {
        let target = node_target(Some("bus-a"), None, true);
        assert!(target.fanout);
    }

    #[test]
    fn key_ignores_server_and_fanout() {
        let unicast = service_target("nova", Some("p"), Some("node-1"), false);
        let fanout = service_target("nova", Some("p"), None, true);
        assert_eq!(unicast.key(), fanout.key());
    }

    #[test]
    fn different_partitions_yield_disjoint_keys() {
        let a = service_target("nova", Some("p1"), None, false);
        let b = service_target("nova", Some("p2"), None, false);
        assert_ne!(a.key(), b.key());
    }
}
