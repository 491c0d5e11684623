//! DSE node layer: service hosting, RPC with fail-fast liveness probing,
//! sequenced pub/sub, and datasource synchronization over a partitioned
//! message bus.
//!
//! A [`DseNode`] hosts [`DataService`]s, serves control endpoints on its
//! node topic, and fronts an [`RpcGateway`] for talking to services anywhere
//! on the bus. The topic grammar and wire types live in `dse-core`.

pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod node;
pub mod peers;
pub mod registry;
pub mod service;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::NodeConfig;
pub use drivers::{DriverFactory, DriverRegistry};
pub use error::{DseError, TransportError};
pub use gateway::RpcGateway;
pub use node::DseNode;
pub use peers::{NoPeers, PeerPresence, StaticPeerView};
pub use registry::{ServiceRegistry, ServiceSelector};
pub use service::{DataService, HostedService, HIDDEN_SERVICE_PREFIX};
pub use store::{DatasourceStore, MemoryDatasourceStore};
pub use subscriptions::SubscriptionTable;
pub use sync::SyncSummary;
pub use transport::{memory::MemoryBus, RpcClient, RpcHandler, RpcServerHandle, Transport};
