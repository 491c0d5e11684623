//! Message transport boundary.
//!
//! The underlying broker and its wire protocol are external collaborators;
//! this module pins down the interface the node layer consumes: a way to
//! stand up an RPC server on a target, and a client that can unicast-call or
//! fanout-cast to one. [`memory::MemoryBus`] is the in-process
//! implementation used by tests and single-process deployments.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use dse_core::messages::RequestContext;
use dse_core::target::RpcTarget;

use crate::error::{DseError, TransportError};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Explicit, enumerated RPC endpoint surface.
///
/// Every method a component exposes on the bus is routed through a single
/// typed dispatch point; there is no reflection over public methods.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
    ) -> Result<Value, DseError>;
}

/// Client half of the transport, bound to one target.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Unicast call: suspends until the reply arrives, the timeout elapses,
    /// or delivery fails. `retry` is the number of extra delivery attempts;
    /// timeouts are never retried (the remote side may have executed).
    async fn call(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
        timeout: Duration,
        retry: Option<u32>,
    ) -> Result<Value, TransportError>;

    /// Fire-and-forget cast; fanout targets reach every member of the topic.
    async fn cast(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
    ) -> Result<(), TransportError>;
}

/// Server-producing half of the transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds `handler` to `target` and starts serving. The endpoint is
    /// reachable by peers once this returns.
    async fn serve(
        &self,
        target: RpcTarget,
        handler: Arc<dyn RpcHandler>,
    ) -> anyhow::Result<RpcServerHandle>;

    /// Creates a client bound to `target`.
    fn client(&self, target: RpcTarget) -> Box<dyn RpcClient>;
}

// ---------------------------------------------------------------------------
// RpcServerHandle
// ---------------------------------------------------------------------------

/// Handle to a running RPC server: `stop` signals shutdown, `wait` blocks
/// until in-flight dispatches have drained.
pub struct RpcServerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RpcServerHandle {
    #[must_use]
    pub fn new(shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            shutdown,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Signals the server loop to stop accepting new requests.
    pub fn stop(&self) {
        // Ignore send errors -- the loop may already have exited.
        let _ = self.shutdown.send(true);
    }

    /// Waits until the server loop has drained and exited. Idempotent.
    pub async fn wait(&self) {
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for RpcServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServerHandle").finish_non_exhaustive()
    }
}
