//! Directory of known servers per remote datacenter.
//!
//! Built from WAN gossip and read by cross-datacenter request forwarding.
//! It is a cache of current gossip truth, rebuilt from scratch on restart.
//!
//! Invariants:
//! - no address appears twice within a datacenter
//! - a datacenter is present only while it has at least one address
//! - every read and write goes through the same lock

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Mutex;

/// Known server addresses keyed by datacenter.
///
/// Thread-safe; wrap in `Arc` to share between the WAN handler and routing.
#[derive(Debug, Default)]
pub struct RemoteDirectory {
    servers: Mutex<HashMap<String, Vec<SocketAddr>>>,
}

impl RemoteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server unless it is already known.
    ///
    /// Returns true if the address was inserted.
    pub fn add(&self, datacenter: &str, addr: SocketAddr) -> bool {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let known = servers.entry(datacenter.to_string()).or_default();
        if known.contains(&addr) {
            return false;
        }
        known.push(addr);
        true
    }

    /// Remove a server if known, dropping the datacenter once it is empty.
    ///
    /// The removed slot is filled by the last entry, so order is not kept.
    /// Returns true if the address was found.
    pub fn remove(&self, datacenter: &str, addr: SocketAddr) -> bool {
        let mut servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let Some(known) = servers.get_mut(datacenter) else {
            return false;
        };

        let found = match known.iter().position(|a| *a == addr) {
            Some(index) => {
                known.swap_remove(index);
                true
            }
            None => false,
        };

        if known.is_empty() {
            servers.remove(datacenter);
        }
        found
    }

    /// Servers known for a datacenter (empty if none).
    pub fn servers(&self, datacenter: &str) -> Vec<SocketAddr> {
        self.servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(datacenter)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, datacenter: &str, addr: SocketAddr) -> bool {
        self.servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(datacenter)
            .is_some_and(|known| known.contains(&addr))
    }

    /// Known datacenters, sorted.
    pub fn datacenters(&self) -> Vec<String> {
        let servers = self.servers.lock().unwrap_or_else(|e| e.into_inner());
        let mut dcs: Vec<_> = servers.keys().cloned().collect();
        dcs.sort();
        dcs
    }

    /// Consistent copy of the whole directory, sorted by datacenter.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<SocketAddr>> {
        self.servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(dc, known)| (dc.clone(), known.clone()))
            .collect()
    }

    /// Number of datacenters with at least one known server.
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
