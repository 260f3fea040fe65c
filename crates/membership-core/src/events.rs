//! Event infrastructure for membership reconciliation.
//!
//! Every diagnostic the reconciler logs is also published as a
//! `ReconcileEvent` on its `EventBus`.

use crate::gossip::View;
use crate::join::JoinOutcome;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted while reconciling gossip membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReconcileEvent {
    /// A member advertised a server role that could not be parsed.
    RoleRejected {
        member: String,
        role: String,
        reason: String,
    },
    /// A server from another datacenter joined the LAN pool.
    WrongDatacenter { member: String, datacenter: String },
    /// A member without a server role showed up in the WAN pool.
    NonServerInWan { member: String, addr: IpAddr },
    /// Reading the consensus peers failed; the join will be retried.
    PeersReadFailed { member: String, error: String },
    /// Adding a consensus peer failed; the join will be retried.
    AddPeerFailed {
        member: String,
        addr: SocketAddr,
        error: String,
    },
    /// A server was added to the consensus peer set.
    PeerAdded { member: String, addr: SocketAddr },
    /// A join retry task terminated.
    JoinFinished { member: String, outcome: JoinOutcome },
    /// A WAN server was recorded in the directory.
    RemoteServerAdded {
        datacenter: String,
        addr: SocketAddr,
        #[serde(rename = "alreadyKnown")]
        already_known: bool,
    },
    /// A WAN server left or failed.
    RemoteServerRemoved {
        datacenter: String,
        addr: SocketAddr,
        found: bool,
    },
    /// A gossip event kind the handler does not act on.
    UnhandledEvent { view: View, kind: String },
}

type Filter = Box<dyn Fn(&ReconcileEvent) -> bool + Send + Sync>;
type Callback = Box<dyn Fn(ReconcileEvent) + Send + Sync>;

struct Listener {
    id: u64,
    accepts: Filter,
    deliver: Callback,
}

/// Fan-out of reconcile events to in-process listeners.
///
/// Listeners are invoked synchronously on the emitting task, so they must not
/// block.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
}

/// Keeps a listener registered until dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|l| l.id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(ReconcileEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_where(|_| true, callback)
    }

    /// Receive only the events `filter` accepts.
    pub fn subscribe_where(
        self: &Arc<Self>,
        filter: impl Fn(&ReconcileEvent) -> bool + Send + Sync + 'static,
        callback: impl Fn(ReconcileEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Listener {
            id,
            accepts: Box::new(filter),
            deliver: Box::new(callback),
        };
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn emit(&self, event: ReconcileEvent) {
        // The lock is released before delivery; listeners may (un)subscribe.
        let matching: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| (l.accepts)(&event))
            .cloned()
            .collect();

        for listener in matching {
            (listener.deliver)(event.clone());
        }
    }
}
