//! RPC gateway: unicast calls and fanout casts to nodes and services, with
//! fail-fast liveness probing and timeout-to-domain-error translation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use dse_core::messages::{PublishPayload, RequestContext, SequencedPublishPayload};
use dse_core::target::{node_target, service_target};

use crate::error::{DseError, TransportError};
use crate::peers::PeerPresence;
use crate::registry::ServiceRegistry;
use crate::transport::Transport;

/// Per-node RPC client surface over the shared transport.
pub struct RpcGateway {
    transport: Arc<dyn Transport>,
    node_id: String,
    context: RequestContext,
    partition: Option<String>,
    ping_timeout: Duration,
    long_timeout: Duration,
    registry: Arc<ServiceRegistry>,
    peers: Arc<dyn PeerPresence>,
}

impl RpcGateway {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        context: RequestContext,
        partition: Option<String>,
        ping_timeout: Duration,
        long_timeout: Duration,
        registry: Arc<ServiceRegistry>,
        peers: Arc<dyn PeerPresence>,
    ) -> Self {
        Self {
            transport,
            node_id: context.node_id.clone(),
            context,
            partition,
            ping_timeout,
            long_timeout,
            registry,
            peers,
        }
    }

    // -----------------------------------------------------------------------
    // Service name resolution
    // -----------------------------------------------------------------------

    /// Ids of all services on all nodes: the local enumeration plus every
    /// peer's advertised services.
    #[must_use]
    pub fn global_service_names(&self, include_hidden: bool) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.registry.service_ids(include_hidden).into_iter().collect();
        for peer in self.peers.status().peers.values() {
            names.extend(peer.services.iter().cloned());
        }
        names
    }

    /// Whether `service_id` is known to be live anywhere on the bus.
    #[must_use]
    pub fn is_valid_service(&self, service_id: &str) -> bool {
        self.global_service_names(true).contains(service_id)
    }

    // -----------------------------------------------------------------------
    // Node-targeted RPC
    // -----------------------------------------------------------------------

    /// Unicast call to one node's control endpoint. Transport-level timeout
    /// and delivery-failure errors propagate unchanged.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] from the underlying call.
    pub async fn invoke_node(
        &self,
        node_id: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let target = node_target(self.partition.as_deref(), Some(node_id), false);
        debug!(node_id = %self.node_id, method, topic = %target.topic, "invoking node rpc");
        self.transport
            .client(target)
            .call(
                &self.context,
                method,
                args,
                timeout.unwrap_or(self.long_timeout),
                None,
            )
            .await
    }

    /// Fanout cast to every node's control endpoint. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Delivery failures are surfaced but carry no result.
    pub async fn broadcast_node(&self, method: &str, args: Value) -> Result<(), TransportError> {
        let target = node_target(self.partition.as_deref(), None, true);
        debug!(node_id = %self.node_id, method, topic = %target.topic, "casting node rpc");
        self.transport
            .client(target)
            .cast(&self.context, method, args)
            .await
    }

    // -----------------------------------------------------------------------
    // Service-targeted RPC
    // -----------------------------------------------------------------------

    /// Unicast call to a service, pinned to the local node when
    /// `local_only`.
    ///
    /// If the service is not currently known to be live anywhere, a
    /// short-timeout ping probes the destination first so an unresponsive
    /// target fails fast instead of consuming the caller's full timeout.
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when the probe or the call itself times out or
    /// fails delivery; other transport errors propagate via
    /// [`DseError::Transport`].
    pub async fn invoke_service(
        &self,
        service_id: &str,
        method: &str,
        args: Value,
        timeout: Option<Duration>,
        local_only: bool,
        retry: Option<u32>,
    ) -> Result<Value, DseError> {
        let server = local_only.then_some(self.node_id.as_str());
        let target = service_target(service_id, self.partition.as_deref(), server, false);
        let client = self.transport.client(target.clone());

        if !self.is_valid_service(service_id) {
            debug!(
                node_id = %self.node_id,
                service_id,
                "service not known live, pinging before rpc"
            );
            match client
                .call(&self.context, "ping", Value::Null, self.ping_timeout, None)
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_unreachable() => {
                    return Err(DseError::service_not_found(service_id));
                }
                Err(err) => return Err(err.into()),
            }
        }

        debug!(node_id = %self.node_id, service_id, method, topic = %target.topic, "invoking service rpc");
        match client
            .call(
                &self.context,
                method,
                args,
                timeout.unwrap_or(self.long_timeout),
                retry,
            )
            .await
        {
            Ok(result) => Ok(result),
            Err(err) if err.is_unreachable() => Err(DseError::service_not_found(service_id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Fanout cast to every instance of a service. No liveness probe: fanout
    /// collects no response, so an unknown id fails fast on the name check
    /// alone.
    ///
    /// # Errors
    ///
    /// `ServiceNotFound` when the id is not in the global name set at cast
    /// time.
    pub async fn broadcast_service(
        &self,
        service_id: &str,
        method: &str,
        args: Value,
    ) -> Result<(), DseError> {
        if !self.is_valid_service(service_id) {
            return Err(DseError::service_not_found(service_id));
        }
        let target = service_target(service_id, self.partition.as_deref(), None, true);
        debug!(node_id = %self.node_id, service_id, method, topic = %target.topic, "casting service rpc");
        self.transport
            .client(target)
            .cast(&self.context, method, args)
            .await
            .map_err(DseError::from)
    }

    // -----------------------------------------------------------------------
    // Publication
    // -----------------------------------------------------------------------

    /// Legacy unsequenced publication: fanout of a full snapshot to every
    /// node's dispatcher.
    ///
    /// # Errors
    ///
    /// Delivery failures from the underlying cast.
    pub async fn publish_table(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
    ) -> Result<(), TransportError> {
        let payload = PublishPayload {
            publisher: publisher.to_string(),
            table: table.to_string(),
            data,
        };
        let args =
            serde_json::to_value(payload).map_err(|err| TransportError::Codec(err.to_string()))?;
        self.broadcast_node("handle_publish", args).await
    }

    /// Sequenced publication: snapshot-or-diff tagged with `seqnum`.
    ///
    /// # Errors
    ///
    /// Delivery failures from the underlying cast.
    pub async fn publish_table_sequenced(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
        is_snapshot: bool,
        seqnum: u64,
    ) -> Result<(), TransportError> {
        let payload = SequencedPublishPayload {
            publisher: publisher.to_string(),
            table: table.to_string(),
            data,
            is_snapshot,
            seqnum,
        };
        let args =
            serde_json::to_value(payload).map_err(|err| TransportError::Codec(err.to_string()))?;
        self.broadcast_node("handle_publish_sequenced", args).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
