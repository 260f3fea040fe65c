//! Consensus peer set abstraction.
//!
//! The replication engine owns the peer set; the reconciler only reads
//! snapshots of it and asks for peers to be added.
//!
//! Implementations:
//! - `InMemoryPeerSet` - For the replay daemon and tests
//! - A real engine adapter wraps its own peer storage and add-peer future

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Failed to read peers: {0}")]
    PeersUnavailable(String),

    #[error("Failed to add peer {addr}: {reason}")]
    AddPeerFailed { addr: SocketAddr, reason: String },
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// The consensus group's peer set.
///
/// Both calls may fail transiently. `add_peer` may block for as long as the
/// engine needs to commit the configuration change.
#[async_trait]
pub trait PeerSet: Send + Sync {
    /// Current peers. The result is stale as soon as it is returned.
    async fn peers(&self) -> Result<Vec<SocketAddr>>;

    /// Ask the engine to add a peer.
    async fn add_peer(&self, addr: SocketAddr) -> Result<()>;
}

/// In-memory peer set with scriptable failures.
pub struct InMemoryPeerSet {
    peers: Mutex<Vec<SocketAddr>>,
    failing_reads: AtomicUsize,
    failing_adds: AtomicUsize,
    read_requests: AtomicUsize,
    add_requests: AtomicUsize,
    add_latency: Option<Duration>,
}

impl InMemoryPeerSet {
    pub fn new() -> Self {
        Self::with_peers(Vec::new())
    }

    pub fn with_peers(peers: Vec<SocketAddr>) -> Self {
        Self {
            peers: Mutex::new(peers),
            failing_reads: AtomicUsize::new(0),
            failing_adds: AtomicUsize::new(0),
            read_requests: AtomicUsize::new(0),
            add_requests: AtomicUsize::new(0),
            add_latency: None,
        }
    }

    /// Delay every add request, like an engine waiting on a commit.
    pub fn with_add_latency(mut self, latency: Duration) -> Self {
        self.add_latency = Some(latency);
        self
    }

    /// Make the next `n` reads fail.
    pub fn fail_next_reads(&self, n: usize) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` add requests fail. `usize::MAX` fails them all.
    pub fn fail_next_adds(&self, n: usize) {
        self.failing_adds.store(n, Ordering::SeqCst);
    }

    /// Number of `peers()` calls so far.
    pub fn read_requests(&self) -> usize {
        self.read_requests.load(Ordering::SeqCst)
    }

    /// Number of `add_peer()` calls so far, successful or not.
    pub fn add_requests(&self) -> usize {
        self.add_requests.load(Ordering::SeqCst)
    }

    /// Copy of the current peers, without counting as a read.
    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl Default for InMemoryPeerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerSet for InMemoryPeerSet {
    async fn peers(&self) -> Result<Vec<SocketAddr>> {
        self.read_requests.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(ConsensusError::PeersUnavailable(
                "peer store unavailable".to_string(),
            ));
        }
        Ok(self.snapshot())
    }

    async fn add_peer(&self, addr: SocketAddr) -> Result<()> {
        self.add_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.add_latency {
            tokio::time::sleep(latency).await;
        }
        if Self::take_failure(&self.failing_adds) {
            return Err(ConsensusError::AddPeerFailed {
                addr,
                reason: "no leader".to_string(),
            });
        }

        // Concurrent adds of the same address collapse into one peer.
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        if !peers.contains(&addr) {
            peers.push(addr);
        }
        Ok(())
    }
}
