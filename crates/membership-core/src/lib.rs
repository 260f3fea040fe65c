//! membership-core: reconciles gossip membership into cluster state.
//!
//! This crate provides:
//! - Classification of gossip members by their advertised server role
//! - Join retry tasks that add same-datacenter servers to the consensus peers
//! - A directory of known servers per remote datacenter, fed by WAN gossip
//! - LAN and WAN event handler loops with cooperative shutdown
//! - `MemberSource` and `PeerSet` trait abstractions for the gossip and
//!   consensus collaborators

pub mod config;
pub mod consensus;
pub mod directory;
pub mod dispatch;
pub mod events;
pub mod gossip;
pub mod join;
pub mod reconciler;
pub mod role;

pub use config::{ConfigError, ReconcilerConfig, DEFAULT_JOIN_RETRY_INTERVAL};
pub use consensus::{ConsensusError, InMemoryPeerSet, PeerSet};
pub use directory::RemoteDirectory;
pub use dispatch::EVENT_CHANNEL_CAPACITY;
pub use events::{EventBus, ReconcileEvent, Subscription};
pub use gossip::{
    member_status, Member, MemberSource, MemberStatus, MembershipEvent, StaticMembers, View,
};
pub use join::{JoinCandidate, JoinOutcome, JoinRetry};
pub use reconciler::Reconciler;
pub use role::{classify, MemberFact, RoleError, ServerRole, SERVER_ROLE_MARKER};
pub use tokio_util::sync::CancellationToken;
