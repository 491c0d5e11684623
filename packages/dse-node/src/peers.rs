//! Peer-presence collaborator boundary.
//!
//! The control-bus protocol that discovers peers and their subscription
//! tables lives outside this crate; the node only consumes its latest
//! observation.

use arc_swap::ArcSwap;

use dse_core::types::DseStatus;

/// Supplies the latest observation of bus-wide peer status.
pub trait PeerPresence: Send + Sync {
    fn status(&self) -> DseStatus;
}

/// Empty peer view: the node sees only its own services.
#[derive(Debug, Default)]
pub struct NoPeers;

impl PeerPresence for NoPeers {
    fn status(&self) -> DseStatus {
        DseStatus::default()
    }
}

/// Peer view backed by an `ArcSwap` so the control-bus integration (or a
/// test) can publish a new observation without blocking readers.
pub struct StaticPeerView {
    view: ArcSwap<DseStatus>,
}

impl StaticPeerView {
    #[must_use]
    pub fn new(status: DseStatus) -> Self {
        Self {
            view: ArcSwap::from_pointee(status),
        }
    }

    /// Replaces the current observation.
    pub fn set(&self, status: DseStatus) {
        self.view.store(std::sync::Arc::new(status));
    }
}

impl Default for StaticPeerView {
    fn default() -> Self {
        Self::new(DseStatus::default())
    }
}

impl PeerPresence for StaticPeerView {
    fn status(&self) -> DseStatus {
        self.view.load().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use dse_core::types::PeerInfo;

    use super::*;

    #[test]
    fn no_peers_reports_empty_status() {
        assert!(NoPeers.status().peers.is_empty());
    }

    #[test]
    fn static_view_swaps_observations() {
        let view = StaticPeerView::default();
        assert!(view.status().peers.is_empty());

        view.set(DseStatus {
            peers: HashMap::from([(
                "node-2".to_string(),
                PeerInfo {
                    services: vec!["nova".to_string()],
                    subscribed_tables: HashMap::new(),
                },
            )]),
        });
        assert_eq!(view.status().peers["node-2"].services, vec!["nova"]);
    }
}
