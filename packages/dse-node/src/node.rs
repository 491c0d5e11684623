//! The DSE node: hosts services, serves the control endpoints, and fronts
//! the RPC gateway, subscriptions, and datasource lifecycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use dse_core::messages::RequestContext;
use dse_core::target::node_target;
use dse_core::types::{DseStatus, PeerInfo};

use crate::config::NodeConfig;
use crate::dispatch::{self, NodeEndpoints};
use crate::drivers::DriverRegistry;
use crate::error::{DseError, TransportError};
use crate::gateway::RpcGateway;
use crate::peers::PeerPresence;
use crate::registry::{ServiceRegistry, ServiceSelector};
use crate::service::{DataService, HostedService};
use crate::store::DatasourceStore;
use crate::subscriptions::SubscriptionTable;
use crate::sync::SyncWorker;
use crate::transport::{RpcServerHandle, Transport};

// ---------------------------------------------------------------------------
// DseNode
// ---------------------------------------------------------------------------

/// One DSE node. Cheap to clone; all clones share the same inner state.
///
/// Construction brings the control endpoints up immediately; the node is
/// addressable by peers as soon as [`DseNode::new`] returns. [`DseNode::stop`]
/// tears everything down in reverse order.
#[derive(Clone)]
pub struct DseNode {
    pub(crate) inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    pub(crate) config: NodeConfig,
    pub(crate) node_id: String,
    pub(crate) instance: Uuid,
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) subscriptions: Arc<SubscriptionTable>,
    pub(crate) drivers: DriverRegistry,
    pub(crate) store: Arc<dyn DatasourceStore>,
    pub(crate) peers: Arc<dyn PeerPresence>,
    pub(crate) gateway: RpcGateway,
    pub(crate) control_server: RpcServerHandle,
    pub(crate) running: AtomicBool,
    pub(crate) sync_worker: tokio::sync::Mutex<Option<SyncWorker>>,
}

impl DseNode {
    /// Starts a node on the given transport: binds the control endpoints and
    /// wires up the gateway. Services and the datasource synchronizer are
    /// added separately.
    ///
    /// # Errors
    ///
    /// Fails if the control RPC server cannot be bound.
    pub async fn new(
        node_id: impl Into<String>,
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        drivers: DriverRegistry,
        store: Arc<dyn DatasourceStore>,
        peers: Arc<dyn PeerPresence>,
    ) -> anyhow::Result<Self> {
        let node_id = node_id.into();
        let instance = Uuid::new_v4();
        let partition = Some(config.partition().to_string());

        let registry = Arc::new(ServiceRegistry::new(
            node_id.clone(),
            partition.clone(),
            Arc::clone(&transport),
        ));
        let subscriptions = Arc::new(SubscriptionTable::new());

        let endpoints = Arc::new(NodeEndpoints::new(
            node_id.clone(),
            instance,
            Arc::clone(&registry),
            Arc::clone(&subscriptions),
        ));
        let control_target = node_target(partition.as_deref(), Some(&node_id), false);
        let control_server = transport.serve(control_target, endpoints).await?;

        let gateway = RpcGateway::new(
            Arc::clone(&transport),
            RequestContext {
                node_id: node_id.clone(),
                instance,
            },
            partition.clone(),
            config.ping_timeout,
            config.long_timeout,
            Arc::clone(&registry),
            Arc::clone(&peers),
        );

        info!(node_id, %instance, partition = partition.as_deref(), "dse node started");
        Ok(Self {
            inner: Arc::new(NodeInner {
                config,
                node_id,
                instance,
                registry,
                subscriptions,
                drivers,
                store,
                peers,
                gateway,
                control_server,
                running: AtomicBool::new(true),
                sync_worker: tokio::sync::Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Per-process instance id, distinguishing restarts of the same node id.
    #[must_use]
    pub fn instance(&self) -> Uuid {
        self.inner.instance
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Service hosting
    // -----------------------------------------------------------------------

    /// Registers a service on this node. See [`ServiceRegistry::register`].
    ///
    /// # Errors
    ///
    /// `DuplicateService` or `Internal` per the registry.
    pub async fn register_service(&self, service: Arc<dyn DataService>) -> Result<(), DseError> {
        self.inner.registry.register(service).await
    }

    /// Unregisters a locally hosted service; a no-op when it is already
    /// gone.
    ///
    /// # Errors
    ///
    /// `Internal` if the service's stop hook fails.
    pub async fn unregister_service(&self, service_id: &str) -> Result<bool, DseError> {
        self.inner
            .registry
            .unregister(ServiceSelector::Id(service_id))
            .await
    }

    /// Locally hosted services.
    #[must_use]
    pub fn get_services(&self, include_hidden: bool) -> Vec<Arc<HostedService>> {
        self.inner.registry.services(include_hidden)
    }

    /// Looks up one locally hosted service.
    #[must_use]
    pub fn service_object(&self, selector: ServiceSelector<'_>) -> Option<Arc<HostedService>> {
        match selector {
            ServiceSelector::Id(id) => self.inner.registry.lookup_id(id),
            ServiceSelector::DsId(ds_id) => self.inner.registry.lookup_ds_id(ds_id),
        }
    }

    /// Service ids across the whole bus, local plus peer-advertised.
    #[must_use]
    pub fn get_global_service_names(&self, include_hidden: bool) -> BTreeSet<String> {
        self.inner.gateway.global_service_names(include_hidden)
    }

    #[must_use]
    pub fn is_valid_service(&self, service_id: &str) -> bool {
        self.inner.gateway.is_valid_service(service_id)
    }

    // -----------------------------------------------------------------------
    // RPC
    // -----------------------------------------------------------------------

    /// Unicast RPC to another node's control endpoint. Transport errors
    /// propagate untranslated.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] from the call.
    pub async fn invoke_node_rpc(
        &self,
        node_id: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        self.inner.gateway.invoke_node(node_id, method, args, timeout).await
    }

    /// Fanout cast to every node's control endpoint.
    ///
    /// # Errors
    ///
    /// Delivery failures from the cast.
    pub async fn broadcast_node_rpc(
        &self,
        method: &str,
        args: Value,
    ) -> Result<(), TransportError> {
        self.inner.gateway.broadcast_node(method, args).await
    }

    /// Unicast RPC to a service anywhere on the bus, with fail-fast liveness
    /// probing. See [`RpcGateway::invoke_service`].
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when the destination is unreachable; otherwise the
    /// call's own error.
    pub async fn invoke_service_rpc(
        &self,
        service_id: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
        local_only: bool,
        retry: Option<u32>,
    ) -> Result<Value, DseError> {
        self.inner
            .gateway
            .invoke_service(service_id, method, args, timeout, local_only, retry)
            .await
    }

    /// Fanout cast to every instance of a service.
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when the id is unknown bus-wide.
    pub async fn broadcast_service_rpc(
        &self,
        service_id: &str,
        method: &str,
        args: Value,
    ) -> Result<(), DseError> {
        self.inner.gateway.broadcast_service(service_id, method, args).await
    }

    // -----------------------------------------------------------------------
    // Pub/sub
    // -----------------------------------------------------------------------

    /// Publishes a full-snapshot update of `table` on behalf of `publisher`.
    ///
    /// # Errors
    ///
    /// Delivery failures from the cast.
    pub async fn publish_table(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
    ) -> Result<(), TransportError> {
        self.inner.gateway.publish_table(publisher, table, data).await
    }

    /// Publishes a sequenced snapshot-or-diff update of `table`.
    ///
    /// # Errors
    ///
    /// Delivery failures from the cast.
    pub async fn publish_table_sequenced(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
        is_snapshot: bool,
        seqnum: u64,
    ) -> Result<(), TransportError> {
        self.inner
            .gateway
            .publish_table_sequenced(publisher, table, data, is_snapshot, seqnum)
            .await
    }

    /// Subscribes a local service to `(publisher, table)` and fetches the
    /// current baseline from the publisher: the sequenced
    /// `[data, seqnum]` pair, or a plain snapshot when the node is
    /// configured for legacy snapshot-only delivery.
    ///
    /// The subscription is recorded before the baseline fetch, so a
    /// publisher that comes up later still reaches the subscriber even when
    /// this returns `ServiceNotFound`.
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when the publisher is unreachable.
    pub async fn subscribe_table(
        &self,
        subscriber: &str,
        publisher: &str,
        table: &str,
    ) -> Result<Value, DseError> {
        self.inner.subscriptions.subscribe(subscriber, publisher, table);
        self.update_tables_with_subscribers();

        let args = json!({ "table": table });
        let method = if self.inner.config.always_snapshot {
            "get_snapshot"
        } else {
            "get_last_published_data_with_seqnum"
        };
        self.invoke_service_rpc(publisher, method, args, None, false, None)
            .await
    }

    /// Drops a local subscription; returns whether it existed.
    pub fn unsubscribe_table(&self, subscriber: &str, publisher: &str, table: &str) -> bool {
        let removed = self
            .inner
            .subscriptions
            .unsubscribe(subscriber, publisher, table);
        self.update_tables_with_subscribers();
        removed
    }

    /// Local subscriber ids of `(publisher, table)`.
    #[must_use]
    pub fn table_subscribers(&self, publisher: &str, table: &str) -> Vec<String> {
        self.inner.subscriptions.subscribers(publisher, table)
    }

    /// Everything a local service subscribes to, keyed by publisher.
    #[must_use]
    pub fn get_subscription(&self, subscriber: &str) -> HashMap<String, BTreeSet<String>> {
        self.inner.subscriptions.subscriptions_of(subscriber)
    }

    /// Recomputes per-service subscriber sets and fires transition hooks.
    pub fn update_tables_with_subscribers(&self) {
        dispatch::update_tables_with_subscribers(
            &self.inner.registry,
            &self.inner.subscriptions,
            self.inner.peers.as_ref(),
        );
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Bus-wide status: the latest peer observation plus this node's own
    /// advertisement.
    #[must_use]
    pub fn dse_status(&self) -> DseStatus {
        let mut status = self.inner.peers.status();
        status
            .peers
            .insert(self.inner.node_id.clone(), self.local_peer_info());
        status
    }

    fn local_peer_info(&self) -> PeerInfo {
        let services = self.inner.registry.service_ids(false);
        let mut subscribed_tables: HashMap<String, BTreeSet<String>> = HashMap::new();
        for service_id in self.inner.registry.service_ids(true) {
            for (publisher, tables) in self.inner.subscriptions.subscriptions_of(&service_id) {
                subscribed_tables.entry(publisher).or_default().extend(tables);
            }
        }
        PeerInfo {
            services,
            subscribed_tables,
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stops the synchronizer, every hosted service, and the control
    /// endpoints, draining in-flight requests. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.inner.sync_worker.lock().await.take() {
            worker.stop().await;
        }
        self.inner.registry.stop_all().await;
        self.inner.registry.wait_all().await;
        self.inner.control_server.stop();
        self.inner.control_server.wait().await;
        info!(node_id = %self.inner.node_id, "dse node stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
