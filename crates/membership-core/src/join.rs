//! Join retry loop for newly discovered LAN servers.
//!
//! Each same-datacenter server seen joining the LAN pool gets its own task
//! that keeps trying to add it to the consensus peer set. A task ends when:
//! - the candidate is this node
//! - the candidate is already a peer
//! - the candidate is no longer alive in the LAN pool
//! - the add request succeeds
//! - shutdown is signalled
//!
//! Failures reading peers or adding the peer are retried after a fixed
//! interval, without an attempt limit.

use crate::config::ReconcilerConfig;
use crate::consensus::PeerSet;
use crate::events::{EventBus, ReconcileEvent};
use crate::gossip::{Member, MemberSource, MemberStatus};
use crate::role::ServerRole;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Why a join task terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinOutcome {
    /// The candidate is this node
    IsSelf,
    /// The candidate was already a consensus peer
    AlreadyPeer,
    /// The candidate is no longer alive in the LAN pool
    NotAlive,
    /// The add request succeeded
    Added,
    /// Shutdown was signalled while waiting to retry
    Shutdown,
}

/// A server to add to the consensus peer set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCandidate {
    /// Member name in the LAN pool, used for liveness checks
    pub name: String,
    /// RPC address to register as a peer
    pub addr: SocketAddr,
}

impl JoinCandidate {
    pub fn new(member: &Member, role: &ServerRole) -> Self {
        Self {
            name: member.name.clone(),
            addr: role.server_addr(member.addr),
        }
    }
}

/// Shared handles a join task needs. Cheap to clone into spawned tasks.
#[derive(Clone)]
pub struct JoinRetry {
    local_node: Arc<str>,
    interval: Duration,
    members: Arc<dyn MemberSource>,
    peers: Arc<dyn PeerSet>,
    events: Arc<EventBus>,
    shutdown: CancellationToken,
}

impl JoinRetry {
    pub fn new(
        config: &ReconcilerConfig,
        members: Arc<dyn MemberSource>,
        peers: Arc<dyn PeerSet>,
        events: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            local_node: Arc::from(config.node_name.as_str()),
            interval: config.join_retry_interval,
            members,
            peers,
            events,
            shutdown,
        }
    }

    /// Try to add the candidate until one of the terminal conditions holds.
    pub async fn run(&self, candidate: JoinCandidate) -> JoinOutcome {
        let outcome = self.join(&candidate).await;
        debug!("Join of {} ({}) finished: {:?}", candidate.name, candidate.addr, outcome);
        self.events.emit(ReconcileEvent::JoinFinished {
            member: candidate.name,
            outcome,
        });
        outcome
    }

    async fn join(&self, candidate: &JoinCandidate) -> JoinOutcome {
        if candidate.name == *self.local_node {
            return JoinOutcome::IsSelf;
        }

        loop {
            if let Some(outcome) = self.attempt(candidate).await {
                return outcome;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return JoinOutcome::Shutdown,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One pass of check-then-add. `None` means retry after the backoff.
    async fn attempt(&self, candidate: &JoinCandidate) -> Option<JoinOutcome> {
        let peers = match self.peers.peers().await {
            Ok(peers) => peers,
            Err(e) => {
                error!("Failed to get consensus peers: {}", e);
                self.events.emit(ReconcileEvent::PeersReadFailed {
                    member: candidate.name.clone(),
                    error: e.to_string(),
                });
                return None;
            }
        };

        if peers.contains(&candidate.addr) {
            return Some(JoinOutcome::AlreadyPeer);
        }

        let status = self.members.status_of(&candidate.name);
        if status != MemberStatus::Alive {
            debug!("Not adding {}: member is {:?}", candidate.name, status);
            return Some(JoinOutcome::NotAlive);
        }

        match self.peers.add_peer(candidate.addr).await {
            Ok(()) => {
                info!("Added consensus peer {} ({})", candidate.name, candidate.addr);
                self.events.emit(ReconcileEvent::PeerAdded {
                    member: candidate.name.clone(),
                    addr: candidate.addr,
                });
                Some(JoinOutcome::Added)
            }
            Err(e) => {
                error!("Failed to add consensus peer {}: {}", candidate.addr, e);
                self.events.emit(ReconcileEvent::AddPeerFailed {
                    member: candidate.name.clone(),
                    addr: candidate.addr,
                    error: e.to_string(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::InMemoryPeerSet;
    use crate::events::Subscription;
    use crate::gossip::StaticMembers;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    const LOCAL: &str = "node-1";

    fn server(name: &str, last: u8) -> Member {
        Member::new(name, IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), "consul:dc1:8300")
    }

    fn candidate(member: &Member) -> JoinCandidate {
        JoinCandidate::new(member, &ServerRole::new("dc1", 8300))
    }

    struct Harness {
        members: Arc<StaticMembers>,
        peers: Arc<InMemoryPeerSet>,
        shutdown: CancellationToken,
        retry: JoinRetry,
        seen: Arc<Mutex<Vec<ReconcileEvent>>>,
        _sub: Subscription,
    }

    impl Harness {
        /// Events other than the final `JoinFinished`, in emission order.
        fn diagnostics(&self) -> Vec<ReconcileEvent> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|e| !matches!(e, ReconcileEvent::JoinFinished { .. }))
                .cloned()
                .collect()
        }
    }

    fn harness(members: Vec<Member>, peers: InMemoryPeerSet) -> Harness {
        let config = ReconcilerConfig::new(LOCAL, "dc1").unwrap();
        let members = Arc::new(StaticMembers::from_members(members));
        let peers = Arc::new(peers);
        let shutdown = CancellationToken::new();
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = events.subscribe(move |event| seen_clone.lock().unwrap().push(event));
        let retry = JoinRetry::new(
            &config,
            members.clone(),
            peers.clone(),
            events,
            shutdown.clone(),
        );
        Harness {
            members,
            peers,
            shutdown,
            retry,
            seen,
            _sub,
        }
    }

    #[test]
    fn test_candidate_uses_rpc_port() {
        let member = server("s2", 2).with_port(8301);
        assert_eq!(candidate(&member).addr.to_string(), "10.0.0.2:8300");
    }

    #[tokio::test]
    async fn test_self_is_never_added() {
        let me = server(LOCAL, 1);
        let h = harness(vec![me.clone()], InMemoryPeerSet::new());

        assert_eq!(h.retry.run(candidate(&me)).await, JoinOutcome::IsSelf);
        assert_eq!(h.peers.add_requests(), 0);
        assert_eq!(h.peers.read_requests(), 0);
        assert_eq!(
            *h.seen.lock().unwrap(),
            vec![ReconcileEvent::JoinFinished {
                member: LOCAL.into(),
                outcome: JoinOutcome::IsSelf,
            }]
        );
    }

    #[tokio::test]
    async fn test_already_peer() {
        let s2 = server("s2", 2);
        let h = harness(
            vec![s2.clone()],
            InMemoryPeerSet::with_peers(vec![candidate(&s2).addr]),
        );

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::AlreadyPeer);
        assert_eq!(h.peers.add_requests(), 0);
    }

    #[tokio::test]
    async fn test_not_alive() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());
        h.members.set_status("s2", MemberStatus::Failed);

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::NotAlive);
        assert_eq!(h.peers.add_requests(), 0);
    }

    #[tokio::test]
    async fn test_unknown_member_is_not_alive() {
        let s2 = server("s2", 2);
        let h = harness(Vec::new(), InMemoryPeerSet::new());

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::NotAlive);
    }

    #[tokio::test]
    async fn test_added_on_first_attempt() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::Added);
        assert_eq!(h.peers.add_requests(), 1);
        assert_eq!(h.peers.snapshot(), vec![candidate(&s2).addr]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_read_failure() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());
        h.peers.fail_next_reads(2);

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::Added);
        assert_eq!(h.peers.read_requests(), 3);
        assert_eq!(h.peers.add_requests(), 1);

        let read_failed = ReconcileEvent::PeersReadFailed {
            member: "s2".into(),
            error: "Failed to read peers: peer store unavailable".into(),
        };
        let added = ReconcileEvent::PeerAdded {
            member: "s2".into(),
            addr: candidate(&s2).addr,
        };
        assert_eq!(
            h.diagnostics(),
            vec![read_failed.clone(), read_failed, added]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_add_failure() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());
        h.peers.fail_next_adds(3);

        assert_eq!(h.retry.run(candidate(&s2)).await, JoinOutcome::Added);
        assert_eq!(h.peers.add_requests(), 4);

        let events = h.diagnostics();
        assert_eq!(events.len(), 4);
        for event in &events[..3] {
            assert!(
                matches!(event, ReconcileEvent::AddPeerFailed { member, .. } if member == "s2"),
                "unexpected {:?}",
                event
            );
        }
        assert_eq!(
            events[3],
            ReconcileEvent::PeerAdded {
                member: "s2".into(),
                addr: candidate(&s2).addr,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_retrying_when_member_fails() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());
        h.peers.fail_next_adds(usize::MAX);

        let retry = h.retry.clone();
        let c = candidate(&s2);
        let task = tokio::spawn(async move { retry.run(c).await });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        h.members.set_status("s2", MemberStatus::Failed);

        assert_eq!(task.await.unwrap(), JoinOutcome::NotAlive);
        assert_eq!(h.peers.add_requests(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let s2 = server("s2", 2);
        let h = harness(vec![s2.clone()], InMemoryPeerSet::new());
        h.peers.fail_next_adds(usize::MAX);

        let retry = h.retry.clone();
        let c = candidate(&s2);
        let task = tokio::spawn(async move { retry.run(c).await });

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let attempts = h.peers.add_requests();
        h.shutdown.cancel();

        let outcome = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("join task should stop within one backoff interval")
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Shutdown);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.peers.add_requests(), attempts);
    }
}
