//! In-process transport: a loopback message bus.
//!
//! Routes MessagePack-encoded envelopes between servers registered under
//! `(exchange, topic)` keys. Unicast calls honor server affinity or
//! round-robin across the topic's membership; fanout casts reach every
//! member. Each server dispatches through a semaphore-bounded worker pool
//! and drains in-flight handlers on stop.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use dse_core::messages::{RequestContext, RpcRequest, RpcResponse};
use dse_core::target::{RpcTarget, TargetKey};

use super::{RpcClient, RpcHandler, RpcServerHandle, Transport};
use crate::error::TransportError;

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_CONCURRENCY: usize = 16;

// ---------------------------------------------------------------------------
// Bus internals
// ---------------------------------------------------------------------------

struct Envelope {
    bytes: Vec<u8>,
    reply: Option<oneshot::Sender<Vec<u8>>>,
}

#[derive(Clone)]
struct ServerEntry {
    id: u64,
    server: Option<String>,
    tx: mpsc::Sender<Envelope>,
}

struct BusInner {
    topics: DashMap<TargetKey, Vec<ServerEntry>>,
    next_entry_id: AtomicU64,
    round_robin: AtomicUsize,
    concurrency: usize,
}

impl BusInner {
    /// Selects the delivery destination for a unicast message.
    fn pick(&self, key: &TargetKey, server: Option<&str>) -> Result<ServerEntry, TransportError> {
        let entries = self.topics.get(key).ok_or_else(|| {
            TransportError::DeliveryFailure(format!("no servers on topic '{}'", key.topic))
        })?;
        if entries.is_empty() {
            return Err(TransportError::DeliveryFailure(format!(
                "no servers on topic '{}'",
                key.topic
            )));
        }
        match server {
            Some(server) => entries
                .iter()
                .find(|entry| entry.server.as_deref() == Some(server))
                .cloned()
                .ok_or_else(|| {
                    TransportError::DeliveryFailure(format!(
                        "no server '{server}' on topic '{}'",
                        key.topic
                    ))
                }),
            None => {
                let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % entries.len();
                Ok(entries[index].clone())
            }
        }
    }

    fn members(&self, key: &TargetKey) -> Vec<ServerEntry> {
        self.topics
            .get(key)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    fn remove_entry(&self, key: &TargetKey, entry_id: u64) {
        if let Some(mut entries) = self.topics.get_mut(key) {
            entries.retain(|entry| entry.id != entry_id);
        }
        self.topics
            .remove_if(key, |_, entries| entries.is_empty());
    }
}

// ---------------------------------------------------------------------------
// MemoryBus
// ---------------------------------------------------------------------------

/// In-process [`Transport`] implementation. Cheap to clone; all clones share
/// one routing table.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_CONCURRENCY)
    }

    /// Bus whose servers dispatch at most `concurrency` requests at a time.
    #[must_use]
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                next_entry_id: AtomicU64::new(0),
                round_robin: AtomicUsize::new(0),
                concurrency,
            }),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn serve(
        &self,
        target: RpcTarget,
        handler: Arc<dyn RpcHandler>,
    ) -> anyhow::Result<RpcServerHandle> {
        let key = target.key();
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let entry_id = self.inner.next_entry_id.fetch_add(1, Ordering::Relaxed);

        self.inner.topics.entry(key.clone()).or_default().push(ServerEntry {
            id: entry_id,
            server: target.server.clone(),
            tx,
        });

        let inner = Arc::clone(&self.inner);
        let concurrency = self.inner.concurrency;
        let task = tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let mut inflight = JoinSet::new();
            loop {
                tokio::select! {
                    envelope = rx.recv() => {
                        let Some(envelope) = envelope else { break };
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };
                        let handler = Arc::clone(&handler);
                        inflight.spawn(async move {
                            let _permit = permit;
                            dispatch(handler.as_ref(), envelope).await;
                        });
                    }
                    _ = shutdown_rx.changed() => break,
                    Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                }
            }
            // Deregister first so new sends fail fast, then drain in-flight
            // dispatches before reporting stopped.
            inner.remove_entry(&key, entry_id);
            while inflight.join_next().await.is_some() {}
        });

        Ok(RpcServerHandle::new(shutdown_tx, task))
    }

    fn client(&self, target: RpcTarget) -> Box<dyn RpcClient> {
        Box::new(MemoryClient {
            inner: Arc::clone(&self.inner),
            target,
        })
    }
}

async fn dispatch(handler: &dyn RpcHandler, envelope: Envelope) {
    let response = match rmp_serde::from_slice::<RpcRequest>(&envelope.bytes) {
        Ok(request) => {
            match handler
                .handle(&request.context, &request.method, request.args)
                .await
            {
                Ok(value) => RpcResponse::Ok(value),
                Err(err) => RpcResponse::Err {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                },
            }
        }
        Err(err) => RpcResponse::Err {
            kind: "codec".to_string(),
            message: err.to_string(),
        },
    };
    match envelope.reply {
        Some(reply) => match rmp_serde::to_vec_named(&response) {
            Ok(bytes) => {
                // Ignore send errors -- the caller may have timed out.
                let _ = reply.send(bytes);
            }
            Err(err) => warn!(error = %err, "failed to encode rpc response"),
        },
        None => {
            if let RpcResponse::Err { kind, message } = response {
                debug!(kind, message, "cast handler raised");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryClient
// ---------------------------------------------------------------------------

struct MemoryClient {
    inner: Arc<BusInner>,
    target: RpcTarget,
}

impl MemoryClient {
    fn encode(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
    ) -> Result<Vec<u8>, TransportError> {
        let request = RpcRequest {
            context: ctx.clone(),
            method: method.to_string(),
            args,
        };
        rmp_serde::to_vec_named(&request).map_err(|err| TransportError::Codec(err.to_string()))
    }

    async fn call_once(
        &self,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let entry = self
            .inner
            .pick(&self.target.key(), self.target.server.as_deref())?;
        let (reply_tx, reply_rx) = oneshot::channel();
        entry
            .tx
            .send(Envelope {
                bytes,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| TransportError::DeliveryFailure("server stopped".to_string()))?;

        let reply = match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(_)) => {
                return Err(TransportError::DeliveryFailure(
                    "server stopped before replying".to_string(),
                ))
            }
            Ok(Ok(bytes)) => bytes,
        };
        match rmp_serde::from_slice::<RpcResponse>(&reply)
            .map_err(|err| TransportError::Codec(err.to_string()))?
        {
            RpcResponse::Ok(value) => Ok(value),
            RpcResponse::Err { kind, message } => Err(TransportError::Remote { kind, message }),
        }
    }
}

#[async_trait]
impl RpcClient for MemoryClient {
    async fn call(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
        timeout: Duration,
        retry: Option<u32>,
    ) -> Result<Value, TransportError> {
        let bytes = self.encode(ctx, method, args)?;
        let attempts = 1 + retry.unwrap_or(0);
        let mut last = None;
        for _ in 0..attempts {
            match self.call_once(bytes.clone(), timeout).await {
                // Only delivery failures are retried: a timeout means the
                // remote side may have executed.
                Err(err @ TransportError::DeliveryFailure(_)) => last = Some(err),
                other => return other,
            }
        }
        Err(last.unwrap_or_else(|| {
            TransportError::DeliveryFailure("no delivery attempts made".to_string())
        }))
    }

    async fn cast(
        &self,
        ctx: &RequestContext,
        method: &str,
        args: Value,
    ) -> Result<(), TransportError> {
        let bytes = self.encode(ctx, method, args)?;
        let key = self.target.key();
        if self.target.fanout {
            // Fanout to an empty topic is a silent no-op, matching broker
            // semantics for topics nobody listens on.
            for entry in self.inner.members(&key) {
                let _ = entry
                    .tx
                    .send(Envelope {
                        bytes: bytes.clone(),
                        reply: None,
                    })
                    .await;
            }
            Ok(())
        } else {
            let entry = self.inner.pick(&key, self.target.server.as_deref())?;
            entry
                .tx
                .send(Envelope { bytes, reply: None })
                .await
                .map_err(|_| TransportError::DeliveryFailure("server stopped".to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
