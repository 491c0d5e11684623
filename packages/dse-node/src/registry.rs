//! Registry of services hosted by this node.
//!
//! All registry-mutating paths acquire the registration mutex before their
//! check-then-insert, because mutation can be triggered both by direct calls
//! and by the periodic datasource synchronizer.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use dse_core::target::service_target;

use crate::error::DseError;
use crate::service::{DataService, HostedService, ServiceRpcHandler, HIDDEN_SERVICE_PREFIX};
use crate::transport::Transport;

/// Selects a hosted service by public id or by stable internal id. Exactly
/// one criterion per lookup.
#[derive(Debug, Clone, Copy)]
pub enum ServiceSelector<'a> {
    Id(&'a str),
    DsId(Uuid),
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// In-process table of locally hosted services.
pub struct ServiceRegistry {
    node_id: String,
    partition: Option<String>,
    transport: Arc<dyn Transport>,
    services: RwLock<Vec<Arc<HostedService>>>,
    /// Named guard scoped to service registration (see module docs).
    registration: tokio::sync::Mutex<()>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(node_id: String, partition: Option<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            node_id,
            partition,
            transport,
            services: RwLock::new(Vec::new()),
            registration: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers a service on this node and starts its RPC server.
    ///
    /// The service is reachable by peers as soon as this returns. Its target
    /// is the service topic pinned (`server`) to this node's id.
    ///
    /// # Errors
    ///
    /// `DuplicateService` if a service with the same id is already hosted
    /// here; `Internal` if the RPC server or the service itself fails to
    /// start.
    pub async fn register(&self, service: Arc<dyn DataService>) -> Result<(), DseError> {
        let _guard = self.registration.lock().await;

        let service_id = service.service_id().to_string();
        if self.lookup_id(&service_id).is_some() {
            return Err(DseError::DuplicateService {
                service_id,
                node_id: self.node_id.clone(),
            });
        }

        let target = service_target(
            &service_id,
            self.partition.as_deref(),
            Some(&self.node_id),
            false,
        );
        let handler = Arc::new(ServiceRpcHandler::new(Arc::clone(&service)));
        let server = self.transport.serve(target.clone(), handler).await?;

        if let Err(err) = service.start().await {
            server.stop();
            server.wait().await;
            return Err(DseError::Internal(err));
        }

        debug!(
            node_id = %self.node_id,
            service_id,
            topic = %target.topic,
            "service rpc server listening"
        );
        self.services
            .write()
            .push(Arc::new(HostedService::new(service, target, server)));
        Ok(())
    }

    /// Unregisters the matching service, stopping it and draining its RPC
    /// server before returning.
    ///
    /// Unregistering a service that is already gone is an idempotent no-op;
    /// returns whether anything was actually removed.
    ///
    /// # Errors
    ///
    /// `Internal` if the service's own `stop` hook fails. The service has
    /// been removed from the host list by then.
    pub async fn unregister(&self, selector: ServiceSelector<'_>) -> Result<bool, DseError> {
        let _guard = self.registration.lock().await;

        let hosted = {
            let mut services = self.services.write();
            let position = services.iter().position(|hosted| match selector {
                ServiceSelector::Id(id) => hosted.service().service_id() == id,
                ServiceSelector::DsId(ds_id) => hosted.service().ds_id() == Some(ds_id),
            });
            position.map(|index| services.remove(index))
        };
        let Some(hosted) = hosted else {
            return Ok(false);
        };

        let service_id = hosted.service().service_id().to_string();
        hosted.service().stop().await?;
        hosted.server().stop();
        hosted.server().wait().await;
        debug!(node_id = %self.node_id, service_id, "service stopped");
        Ok(true)
    }

    /// Looks up a hosted service by its public id. Linear scan; `None` on
    /// miss.
    #[must_use]
    pub fn lookup_id(&self, service_id: &str) -> Option<Arc<HostedService>> {
        self.services
            .read()
            .iter()
            .find(|hosted| hosted.service().service_id() == service_id)
            .cloned()
    }

    /// Looks up a hosted service by its stable internal id.
    #[must_use]
    pub fn lookup_ds_id(&self, ds_id: Uuid) -> Option<Arc<HostedService>> {
        self.services
            .read()
            .iter()
            .find(|hosted| hosted.service().ds_id() == Some(ds_id))
            .cloned()
    }

    /// All hosted services, filtering out hidden ids unless requested.
    #[must_use]
    pub fn services(&self, include_hidden: bool) -> Vec<Arc<HostedService>> {
        self.services
            .read()
            .iter()
            .filter(|hosted| {
                include_hidden
                    || !hosted
                        .service()
                        .service_id()
                        .starts_with(HIDDEN_SERVICE_PREFIX)
            })
            .cloned()
            .collect()
    }

    /// Ids of all hosted services, same hidden-filtering rule.
    #[must_use]
    pub fn service_ids(&self, include_hidden: bool) -> Vec<String> {
        self.services(include_hidden)
            .iter()
            .map(|hosted| hosted.service().service_id().to_string())
            .collect()
    }

    /// Signals every hosted service and its RPC server to stop.
    pub async fn stop_all(&self) {
        let services = self.services(true);
        for hosted in services {
            if let Err(err) = hosted.service().stop().await {
                tracing::warn!(
                    service_id = hosted.service().service_id(),
                    error = %err,
                    "service stop hook failed"
                );
            }
            hosted.server().stop();
        }
    }

    /// Blocks until every hosted service's RPC server has drained.
    pub async fn wait_all(&self) {
        let services = self.services(true);
        for hosted in services {
            hosted.server().wait().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeDataSource;
    use crate::transport::memory::MemoryBus;

    fn registry(bus: &MemoryBus) -> ServiceRegistry {
        ServiceRegistry::new(
            "node-1".to_string(),
            Some("test".to_string()),
            Arc::new(bus.clone()),
        )
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        registry
            .register(Arc::new(FakeDataSource::new("svc-a")))
            .await
            .unwrap();

        let hosted = registry.lookup_id("svc-a").expect("registered service");
        assert_eq!(hosted.service().service_id(), "svc-a");
        assert_eq!(hosted.target().server.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        registry
            .register(Arc::new(FakeDataSource::new("svc-a")))
            .await
            .unwrap();

        let err = registry
            .register(Arc::new(FakeDataSource::new("svc-a")))
            .await
            .unwrap_err();
        assert!(matches!(err, DseError::DuplicateService { .. }));
        assert_eq!(registry.services(true).len(), 1);
    }

    #[tokio::test]
    async fn lookup_after_unregister_returns_none() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        registry
            .register(Arc::new(FakeDataSource::new("svc-a")))
            .await
            .unwrap();

        let removed = registry
            .unregister(ServiceSelector::Id("svc-a"))
            .await
            .unwrap();
        assert!(removed);
        assert!(registry.lookup_id("svc-a").is_none());
    }

    #[tokio::test]
    async fn unregister_of_absent_service_is_a_no_op() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let removed = registry
            .unregister(ServiceSelector::Id("ghost"))
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn unregister_by_ds_id() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        let service = Arc::new(FakeDataSource::new("ds1").with_ds_id(Uuid::new_v4()));
        let ds_id = service.ds_id().unwrap();
        registry.register(service).await.unwrap();

        let removed = registry
            .unregister(ServiceSelector::DsId(ds_id))
            .await
            .unwrap();
        assert!(removed);
        assert!(registry.lookup_ds_id(ds_id).is_none());
    }

    #[tokio::test]
    async fn hidden_services_excluded_from_default_enumeration() {
        let bus = MemoryBus::new();
        let registry = registry(&bus);
        registry
            .register(Arc::new(FakeDataSource::new("visible")))
            .await
            .unwrap();
        registry
            .register(Arc::new(FakeDataSource::new("_hidden")))
            .await
            .unwrap();

        assert_eq!(registry.service_ids(false), vec!["visible".to_string()]);
        let mut all = registry.service_ids(true);
        all.sort();
        assert_eq!(all, vec!["_hidden".to_string(), "visible".to_string()]);
    }

    #[tokio::test]
    async fn registered_service_is_reachable_over_the_bus() {
        use std::time::Duration;

        use dse_core::messages::RequestContext;
        use dse_core::target::service_target;

        let bus = MemoryBus::new();
        let registry = registry(&bus);
        registry
            .register(Arc::new(FakeDataSource::new("svc-a")))
            .await
            .unwrap();

        let client = bus.client(service_target("svc-a", Some("test"), None, false));
        let ctx = RequestContext {
            node_id: "caller".to_string(),
            instance: Uuid::new_v4(),
        };
        let result = client
            .call(
                &ctx,
                "ping",
                serde_json::Value::Null,
                Duration::from_secs(1),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result["service_id"], serde_json::json!("svc-a"));
    }
}
