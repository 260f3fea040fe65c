//! Reconciles gossip membership into consensus peers and the WAN directory.
//!
//! LAN joins of same-datacenter servers spawn join retry tasks. WAN joins,
//! leaves and failures maintain the `RemoteDirectory`. LAN leaves and
//! failures never remove consensus peers on their own.

use crate::config::ReconcilerConfig;
use crate::consensus::PeerSet;
use crate::directory::RemoteDirectory;
use crate::events::{EventBus, ReconcileEvent};
use crate::gossip::{Member, MemberSource, MembershipEvent, View};
use crate::join::{JoinCandidate, JoinOutcome, JoinRetry};
use crate::role::{classify, ServerRole};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Membership reconciler shared by the LAN and WAN event handlers.
///
/// Cloning is cheap; clones share the directory, event bus and shutdown token.
#[derive(Clone)]
pub struct Reconciler {
    config: Arc<ReconcilerConfig>,
    directory: Arc<RemoteDirectory>,
    events: Arc<EventBus>,
    join: JoinRetry,
    pub(crate) shutdown: CancellationToken,
}

impl Reconciler {
    /// Create a reconciler.
    ///
    /// `lan` is the LAN pool snapshot used for liveness checks, `peers` the
    /// consensus peer set, `shutdown` the process-wide shutdown signal.
    pub fn new(
        config: ReconcilerConfig,
        lan: Arc<dyn MemberSource>,
        peers: Arc<dyn PeerSet>,
        shutdown: CancellationToken,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let join = JoinRetry::new(&config, lan, peers, events.clone(), shutdown.clone());
        Self {
            config: Arc::new(config),
            directory: Arc::new(RemoteDirectory::new()),
            events,
            join,
            shutdown,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Directory of remote servers, for cross-datacenter forwarding.
    pub fn directory(&self) -> &Arc<RemoteDirectory> {
        &self.directory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Handle one LAN event.
    ///
    /// Returns the join tasks spawned for it; callers may await them or drop
    /// the handles to let the tasks run detached.
    pub fn handle_lan_event(&self, event: MembershipEvent) -> Vec<JoinHandle<JoinOutcome>> {
        match event {
            MembershipEvent::MemberJoin { members } => self.local_join(&members),
            MembershipEvent::MemberLeave { members } => {
                debug!("LAN leave of {} member(s), no action", members.len());
                Vec::new()
            }
            MembershipEvent::MemberFailed { members } => {
                debug!("LAN failure of {} member(s), no action", members.len());
                Vec::new()
            }
            MembershipEvent::User { name, .. } => {
                debug!("LAN user event {:?}, no action", name);
                Vec::new()
            }
            other => {
                self.unhandled(View::Lan, &other);
                Vec::new()
            }
        }
    }

    /// Handle one WAN event.
    pub fn handle_wan_event(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::MemberJoin { members } => self.remote_join(&members),
            MembershipEvent::MemberLeave { members } | MembershipEvent::MemberFailed { members } => {
                self.remote_failed(&members)
            }
            MembershipEvent::User { .. } => {}
            other => self.unhandled(View::Wan, &other),
        }
    }

    /// Spawn a join task for every same-datacenter server in a LAN join.
    pub fn local_join(&self, members: &[Member]) -> Vec<JoinHandle<JoinOutcome>> {
        let mut tasks = Vec::new();
        for member in members {
            let Some(role) = self.server_role(member) else {
                continue;
            };

            if role.datacenter != self.config.datacenter {
                warn!(
                    "Server {} for datacenter {} has joined wrong cluster",
                    member.name, role.datacenter
                );
                self.events.emit(ReconcileEvent::WrongDatacenter {
                    member: member.name.clone(),
                    datacenter: role.datacenter,
                });
                continue;
            }

            let candidate = JoinCandidate::new(member, &role);
            let join = self.join.clone();
            tasks.push(tokio::spawn(async move { join.run(candidate).await }));
        }
        tasks
    }

    /// Record servers that joined the WAN pool.
    pub fn remote_join(&self, members: &[Member]) {
        for member in members {
            let Some(role) = self.server_role(member) else {
                warn!("Non-server in WAN pool: {} ({})", member.name, member.addr);
                self.events.emit(ReconcileEvent::NonServerInWan {
                    member: member.name.clone(),
                    addr: member.addr,
                });
                continue;
            };

            let addr = role.server_addr(member.addr);
            info!("Adding server (Datacenter: {}) (Addr: {})", role.datacenter, addr);
            let inserted = self.directory.add(&role.datacenter, addr);
            self.events.emit(ReconcileEvent::RemoteServerAdded {
                datacenter: role.datacenter,
                addr,
                already_known: !inserted,
            });
        }
    }

    /// Forget servers that left or failed in the WAN pool.
    pub fn remote_failed(&self, members: &[Member]) {
        for member in members {
            let Some(role) = self.server_role(member) else {
                continue;
            };

            let addr = role.server_addr(member.addr);
            info!("Removing server (Datacenter: {}) (Addr: {})", role.datacenter, addr);
            let found = self.directory.remove(&role.datacenter, addr);
            self.events.emit(ReconcileEvent::RemoteServerRemoved {
                datacenter: role.datacenter,
                addr,
                found,
            });
        }
    }

    /// Server role of a member, publishing malformed roles as rejected.
    fn server_role(&self, member: &Member) -> Option<ServerRole> {
        match classify(member) {
            Ok(fact) => fact.server_role(),
            Err(e) => {
                self.events.emit(ReconcileEvent::RoleRejected {
                    member: member.name.clone(),
                    role: member.role.clone(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn unhandled(&self, view: View, event: &MembershipEvent) {
        warn!("Unhandled {} gossip event: {:?}", view, event);
        self.events.emit(ReconcileEvent::UnhandledEvent {
            view,
            kind: event.kind().to_string(),
        });
    }
}
