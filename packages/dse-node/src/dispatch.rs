//! Control endpoints served on the node topic: liveness, inbound
//! publication fanout, and subscriber-transition bookkeeping.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use dse_core::messages::{PublishPayload, RequestContext, SequencedPublishPayload};

use crate::error::DseError;
use crate::peers::PeerPresence;
use crate::registry::ServiceRegistry;
use crate::subscriptions::SubscriptionTable;
use crate::transport::RpcHandler;

// ---------------------------------------------------------------------------
// NodeEndpoints
// ---------------------------------------------------------------------------

/// RPC endpoints every node serves on its control topic.
pub struct NodeEndpoints {
    node_id: String,
    instance: Uuid,
    registry: Arc<ServiceRegistry>,
    subscriptions: Arc<SubscriptionTable>,
}

impl NodeEndpoints {
    #[must_use]
    pub fn new(
        node_id: String,
        instance: Uuid,
        registry: Arc<ServiceRegistry>,
        subscriptions: Arc<SubscriptionTable>,
    ) -> Self {
        Self {
            node_id,
            instance,
            registry,
            subscriptions,
        }
    }

    /// Routes one inbound publication to every local subscriber of
    /// `(publisher, table)`. Subscribers that disappeared since the
    /// subscription was recorded are skipped.
    async fn deliver(
        &self,
        publisher: &str,
        table: &str,
        data: &Value,
        seqnum: Option<u64>,
        is_snapshot: bool,
    ) {
        let subscribers = self.subscriptions.subscribers(publisher, table);
        debug!(
            node_id = %self.node_id,
            publisher,
            table,
            seqnum,
            subscriber_count = subscribers.len(),
            "delivering publication"
        );
        for subscriber in subscribers {
            let Some(hosted) = self.registry.lookup_id(&subscriber) else {
                warn!(
                    node_id = %self.node_id,
                    subscriber,
                    publisher,
                    table,
                    "subscriber no longer hosted, dropping delivery"
                );
                continue;
            };
            hosted
                .service()
                .receive_data(publisher, table, data.clone(), seqnum, is_snapshot)
                .await;
        }
    }
}

#[async_trait]
impl RpcHandler for NodeEndpoints {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        method: &str,
        args: Value,
    ) -> Result<Value, DseError> {
        match method {
            "ping" => Ok(json!({
                "node_id": self.node_id,
                "instance": self.instance,
            })),
            "handle_publish" => {
                let payload: PublishPayload = serde_json::from_value(args)
                    .map_err(|err| DseError::InvalidArgs(err.to_string()))?;
                // Legacy path: every publication is a full snapshot.
                self.deliver(&payload.publisher, &payload.table, &payload.data, None, true)
                    .await;
                Ok(Value::Null)
            }
            "handle_publish_sequenced" => {
                let payload: SequencedPublishPayload = serde_json::from_value(args)
                    .map_err(|err| DseError::InvalidArgs(err.to_string()))?;
                self.deliver(
                    &payload.publisher,
                    &payload.table,
                    &payload.data,
                    Some(payload.seqnum),
                    payload.is_snapshot,
                )
                .await;
                Ok(Value::Null)
            }
            _ => Err(DseError::UnknownMethod {
                method: method.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber-transition bookkeeping
// ---------------------------------------------------------------------------

/// Recomputes, for every hosted service, the set of its tables that have at
/// least one subscriber anywhere on the bus, and fires the service's
/// first-subscriber / no-subscriber hooks on transitions.
pub fn update_tables_with_subscribers(
    registry: &ServiceRegistry,
    subscriptions: &SubscriptionTable,
    peers: &dyn PeerPresence,
) {
    let status = peers.status();
    for hosted in registry.services(true) {
        let service_id = hosted.service().service_id();

        let mut current: BTreeSet<String> = subscriptions.tables_for(service_id);
        for peer in status.peers.values() {
            if let Some(tables) = peer.subscribed_tables.get(service_id) {
                current.extend(tables.iter().cloned());
            }
        }

        let previous = hosted.swap_tables_with_subscribers(current.clone());
        let gained: BTreeSet<String> = current.difference(&previous).cloned().collect();
        let lost: BTreeSet<String> = previous.difference(&current).cloned().collect();
        if !gained.is_empty() {
            debug!(service_id, tables = ?gained, "tables gained first subscriber");
            hosted.service().on_first_subs(&gained);
        }
        if !lost.is_empty() {
            debug!(service_id, tables = ?lost, "tables lost last subscriber");
            hosted.service().on_no_subs(&lost);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use dse_core::types::{DseStatus, PeerInfo};

    use super::*;
    use crate::peers::{NoPeers, StaticPeerView};
    use crate::testutil::FakeDataSource;
    use crate::transport::memory::MemoryBus;

    fn registry(bus: &MemoryBus) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(
            "node-1".to_string(),
            Some("test".to_string()),
            Arc::new(bus.clone()),
        ))
    }

    fn endpoints(
        registry: &Arc<ServiceRegistry>,
        subscriptions: &Arc<SubscriptionTable>,
    ) -> NodeEndpoints {
        NodeEndpoints::new(
            "node-1".to_string(),
            Uuid::new_v4(),
            Arc::clone(registry),
            Arc::clone(subscriptions),
        )
    }

    fn test_ctx() -> RequestContext {
        RequestContext {
            node_id: "caller".to_string(),
            instance: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn ping_reports_node_identity() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let subscriptions = Arc::new(SubscriptionTable::new());
        let endpoints = endpoints(&registry, &subscriptions);

        let result = endpoints
            .handle(&test_ctx(), "ping", Value::Null)
            .await
            .unwrap();
        assert_eq!(result["node_id"], json!("node-1"));
        assert!(result["instance"].is_string());
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_subscribers() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let subscriber = Arc::new(FakeDataSource::new("listener"));
        let bystander = Arc::new(FakeDataSource::new("bystander"));
        registry.register(Arc::clone(&subscriber) as _).await.unwrap();
        registry.register(Arc::clone(&bystander) as _).await.unwrap();

        let subscriptions = Arc::new(SubscriptionTable::new());
        subscriptions.subscribe("listener", "nova", "servers");
        let endpoints = endpoints(&registry, &subscriptions);

        let args = serde_json::to_value(PublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!([["vm1"]]),
        })
        .unwrap();
        endpoints
            .handle(&test_ctx(), "handle_publish", args)
            .await
            .unwrap();

        let received = subscriber.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].publisher, "nova");
        assert_eq!(received[0].seqnum, None);
        assert!(received[0].is_snapshot);
        assert!(bystander.received().is_empty());
    }

    #[tokio::test]
    async fn sequenced_publish_carries_seqnum_and_snapshot_flag() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let subscriber = Arc::new(FakeDataSource::new("listener"));
        registry.register(Arc::clone(&subscriber) as _).await.unwrap();

        let subscriptions = Arc::new(SubscriptionTable::new());
        subscriptions.subscribe("listener", "nova", "servers");
        let endpoints = endpoints(&registry, &subscriptions);

        let args = serde_json::to_value(SequencedPublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!([["+", "vm2"]]),
            is_snapshot: false,
            seqnum: 42,
        })
        .unwrap();
        endpoints
            .handle(&test_ctx(), "handle_publish_sequenced", args)
            .await
            .unwrap();

        let received = subscriber.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].seqnum, Some(42));
        assert!(!received[0].is_snapshot);
    }

    #[tokio::test]
    async fn publish_skips_vanished_subscribers() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let subscriptions = Arc::new(SubscriptionTable::new());
        subscriptions.subscribe("gone", "nova", "servers");
        let endpoints = endpoints(&registry, &subscriptions);

        let args = serde_json::to_value(PublishPayload {
            publisher: "nova".to_string(),
            table: "servers".to_string(),
            data: json!([]),
        })
        .unwrap();
        // Must not fail even though "gone" is not hosted.
        endpoints
            .handle(&test_ctx(), "handle_publish", args)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_control_method_is_rejected() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let subscriptions = Arc::new(SubscriptionTable::new());
        let endpoints = endpoints(&registry, &subscriptions);

        let err = endpoints
            .handle(&test_ctx(), "bogus", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, DseError::UnknownMethod { .. }));
    }

    #[tokio::test]
    async fn transition_hooks_fire_on_first_and_last_subscriber() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let publisher = Arc::new(FakeDataSource::new("nova"));
        registry.register(Arc::clone(&publisher) as _).await.unwrap();

        let subscriptions = SubscriptionTable::new();
        subscriptions.subscribe("sub1", "nova", "servers");
        update_tables_with_subscribers(&registry, &subscriptions, &NoPeers);
        assert_eq!(
            publisher.first_subs_events(),
            vec![BTreeSet::from(["servers".to_string()])]
        );
        assert!(publisher.no_subs_events().is_empty());

        // No change: no hooks fire again.
        update_tables_with_subscribers(&registry, &subscriptions, &NoPeers);
        assert_eq!(publisher.first_subs_events().len(), 1);

        subscriptions.unsubscribe("sub1", "nova", "servers");
        update_tables_with_subscribers(&registry, &subscriptions, &NoPeers);
        assert_eq!(
            publisher.no_subs_events(),
            vec![BTreeSet::from(["servers".to_string()])]
        );
    }

    #[tokio::test]
    async fn peer_subscriptions_keep_tables_alive() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let publisher = Arc::new(FakeDataSource::new("nova"));
        registry.register(Arc::clone(&publisher) as _).await.unwrap();

        let subscriptions = SubscriptionTable::new();
        let peers = StaticPeerView::new(DseStatus {
            peers: HashMap::from([(
                "node-2".to_string(),
                PeerInfo {
                    services: vec![],
                    subscribed_tables: HashMap::from([(
                        "nova".to_string(),
                        BTreeSet::from(["servers".to_string()]),
                    )]),
                },
            )]),
        });

        update_tables_with_subscribers(&registry, &subscriptions, &peers);
        assert_eq!(
            publisher.first_subs_events(),
            vec![BTreeSet::from(["servers".to_string()])]
        );

        // Peer drops its subscription.
        peers.set(DseStatus::default());
        update_tables_with_subscribers(&registry, &subscriptions, &peers);
        assert_eq!(
            publisher.no_subs_events(),
            vec![BTreeSet::from(["servers".to_string()])]
        );
    }
}
