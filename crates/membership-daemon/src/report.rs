//! Final state report printed when the daemon stops.

use membership_core::{PeerSet, Reconciler};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::warn;

/// Reconciled cluster state at shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterReport {
    /// Node name of this daemon
    pub node: String,
    pub datacenter: String,
    /// Consensus peers (empty if they could not be read)
    pub peers: Vec<SocketAddr>,
    /// Known servers per remote datacenter
    pub remote_servers: BTreeMap<String, Vec<SocketAddr>>,
}

impl ClusterReport {
    pub async fn collect(reconciler: &Reconciler, peers: &dyn PeerSet) -> Self {
        let mut peers = match peers.peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Failed to read consensus peers for report: {}", e);
                Vec::new()
            }
        };
        peers.sort();

        Self {
            node: reconciler.config().node_name.clone(),
            datacenter: reconciler.config().datacenter.clone(),
            peers,
            remote_servers: reconciler.directory().snapshot(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
