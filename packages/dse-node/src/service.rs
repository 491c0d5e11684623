//! Hosted data services and their RPC endpoint surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use dse_core::target::RpcTarget;

use crate::error::DseError;
use crate::transport::{RpcHandler, RpcServerHandle};

/// Service ids beginning with this prefix are hidden from default
/// enumeration.
pub const HIDDEN_SERVICE_PREFIX: char = '_';

// ---------------------------------------------------------------------------
// DataService trait
// ---------------------------------------------------------------------------

/// A named unit of business logic hosted by exactly one node.
///
/// The standard endpoint set (`ping`, `get_snapshot`,
/// `get_last_published_data_with_seqnum`) is dispatched by
/// [`ServiceRpcHandler`]; anything beyond it goes through
/// [`DataService::call_endpoint`].
#[async_trait]
pub trait DataService: Send + Sync {
    /// Globally unique service id. Ids beginning with `_` are hidden.
    fn service_id(&self) -> &str;

    /// Stable internal id; `Some` for driver-backed datasource services.
    fn ds_id(&self) -> Option<Uuid> {
        None
    }

    /// True for services created from a persisted datasource record; the
    /// synchronizer only reclaims these.
    fn is_datasource(&self) -> bool {
        false
    }

    /// Called once after the service's RPC server is listening.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called during unregistration, before the RPC server drains.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Full current state of `table`.
    async fn get_snapshot(&self, table: &str) -> Result<Value, DseError> {
        let _ = table;
        Ok(json!([]))
    }

    /// Last published state of `table` (snapshot or diff) plus its sequence
    /// number, used as the baseline for new subscribers.
    async fn get_last_published(&self, table: &str) -> Result<(Value, u64), DseError> {
        let _ = table;
        Ok((json!([]), 0))
    }

    /// Inbound publication delivery. `seqnum` is `None` on the legacy
    /// unsequenced path.
    async fn receive_data(
        &self,
        publisher: &str,
        table: &str,
        data: Value,
        seqnum: Option<u64>,
        is_snapshot: bool,
    );

    /// A table of this service gained its first subscriber.
    fn on_first_subs(&self, tables: &BTreeSet<String>) {
        let _ = tables;
    }

    /// A table of this service lost its last subscriber.
    fn on_no_subs(&self, tables: &BTreeSet<String>) {
        let _ = tables;
    }

    /// Service-specific RPC endpoints beyond the standard set.
    async fn call_endpoint(&self, method: &str, args: Value) -> Result<Value, DseError> {
        let _ = args;
        Err(DseError::UnknownMethod {
            method: method.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// HostedService
// ---------------------------------------------------------------------------

/// Registry entry binding a service to this node: its assigned target, its
/// running RPC server, and the last-known set of tables with at least one
/// subscriber (for transition detection).
pub struct HostedService {
    service: Arc<dyn DataService>,
    target: RpcTarget,
    server: RpcServerHandle,
    tables_with_subscribers: parking_lot::Mutex<BTreeSet<String>>,
}

impl HostedService {
    #[must_use]
    pub fn new(service: Arc<dyn DataService>, target: RpcTarget, server: RpcServerHandle) -> Self {
        Self {
            service,
            target,
            server,
            tables_with_subscribers: parking_lot::Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<dyn DataService> {
        &self.service
    }

    #[must_use]
    pub fn target(&self) -> &RpcTarget {
        &self.target
    }

    #[must_use]
    pub fn server(&self) -> &RpcServerHandle {
        &self.server
    }

    /// Replaces the recorded tables-with-subscribers set, returning the
    /// previous one.
    pub fn swap_tables_with_subscribers(&self, tables: BTreeSet<String>) -> BTreeSet<String> {
        let mut current = self.tables_with_subscribers.lock();
        std::mem::replace(&mut *current, tables)
    }
}

// ---------------------------------------------------------------------------
// ServiceRpcHandler
// ---------------------------------------------------------------------------

/// Adapts a [`DataService`] to the transport's [`RpcHandler`], routing the
/// standard endpoints and falling through to `call_endpoint`.
pub struct ServiceRpcHandler {
    service: Arc<dyn DataService>,
}

impl ServiceRpcHandler {
    #[must_use]
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self { service }
    }
}

/// Extracts a required string argument from an RPC args object.
pub(crate) fn str_arg(args: &Value, key: &str) -> Result<String, DseError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| DseError::InvalidArgs(format!("missing string argument '{key}'")))
}

#[async_trait]
impl RpcHandler for ServiceRpcHandler {
    async fn handle(
        &self,
        _ctx: &dse_core::messages::RequestContext,
        method: &str,
        args: Value,
    ) -> Result<Value, DseError> {
        match method {
            "ping" => Ok(json!({"service_id": self.service.service_id()})),
            "get_snapshot" => {
                let table = str_arg(&args, "table")?;
                self.service.get_snapshot(&table).await
            }
            "get_last_published_data_with_seqnum" => {
                let table = str_arg(&args, "table")?;
                let (data, seqnum) = self.service.get_last_published(&table).await?;
                Ok(json!([data, seqnum]))
            }
            _ => self.service.call_endpoint(method, args).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
