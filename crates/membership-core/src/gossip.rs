//! Gossip membership types consumed by the reconciler.
//!
//! The gossip protocol itself lives elsewhere. This module only describes
//! what it hands us:
//! - `MembershipEvent`s delivered in order per view (LAN or WAN)
//! - point-in-time member snapshots through `MemberSource`

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;
use std::sync::RwLock;

/// Status of a member as seen by the gossip layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberStatus {
    /// Not present in the snapshot
    #[default]
    None,
    /// Member is alive
    Alive,
    /// Member announced it is leaving
    Leaving,
    /// Member left gracefully
    Left,
    /// Member was detected as failed
    Failed,
}

/// A member record carried by gossip events and snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Node name (unique within a view)
    pub name: String,
    /// Network address the member gossips from
    pub addr: IpAddr,
    /// Gossip port (not the RPC port)
    #[serde(default)]
    pub port: u16,
    /// Advertised role tag
    #[serde(default)]
    pub role: String,
    #[serde(default = "alive")]
    pub status: MemberStatus,
}

fn alive() -> MemberStatus {
    MemberStatus::Alive
}

impl Member {
    /// Create an alive member.
    pub fn new(name: impl Into<String>, addr: IpAddr, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr,
            port: 0,
            role: role.into(),
            status: MemberStatus::Alive,
        }
    }

    pub fn with_status(mut self, status: MemberStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.status == MemberStatus::Alive
    }
}

/// Which gossip pool an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum View {
    /// Local-area pool, scoped to one datacenter
    Lan,
    /// Wide-area pool, spanning datacenters
    Wan,
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            View::Lan => f.write_str("LAN"),
            View::Wan => f.write_str("WAN"),
        }
    }
}

/// An event delivered by a gossip view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MembershipEvent {
    MemberJoin { members: Vec<Member> },
    MemberLeave { members: Vec<Member> },
    MemberFailed { members: Vec<Member> },
    MemberUpdate { members: Vec<Member> },
    MemberReap { members: Vec<Member> },
    /// Custom event broadcast by an operator or application
    User {
        name: String,
        #[serde(default)]
        payload: Vec<u8>,
    },
    Query {
        name: String,
        #[serde(default)]
        payload: Vec<u8>,
    },
}

impl MembershipEvent {
    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            MembershipEvent::MemberJoin { .. } => "member-join",
            MembershipEvent::MemberLeave { .. } => "member-leave",
            MembershipEvent::MemberFailed { .. } => "member-failed",
            MembershipEvent::MemberUpdate { .. } => "member-update",
            MembershipEvent::MemberReap { .. } => "member-reap",
            MembershipEvent::User { .. } => "user",
            MembershipEvent::Query { .. } => "query",
        }
    }

    /// Members carried by the event (empty for user events and queries).
    pub fn members(&self) -> &[Member] {
        match self {
            MembershipEvent::MemberJoin { members }
            | MembershipEvent::MemberLeave { members }
            | MembershipEvent::MemberFailed { members }
            | MembershipEvent::MemberUpdate { members }
            | MembershipEvent::MemberReap { members } => members,
            MembershipEvent::User { .. } | MembershipEvent::Query { .. } => &[],
        }
    }
}

/// Point-in-time view of the members of a gossip pool.
pub trait MemberSource: Send + Sync {
    /// Current members with their status.
    fn members(&self) -> Vec<Member>;

    /// Status of a member by name, `MemberStatus::None` when unknown.
    fn status_of(&self, name: &str) -> MemberStatus {
        member_status(&self.members(), name)
    }
}

/// Scan a member list for a name, returning its status or `MemberStatus::None`.
pub fn member_status(members: &[Member], name: &str) -> MemberStatus {
    members
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.status)
        .unwrap_or(MemberStatus::None)
}

/// A `MemberSource` backed by a plain list.
///
/// Used by the replay daemon and by tests. Thread-safe; wrap in `Arc` to share.
#[derive(Default)]
pub struct StaticMembers {
    members: RwLock<Vec<Member>>,
}

impl StaticMembers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(members: Vec<Member>) -> Self {
        Self {
            members: RwLock::new(members),
        }
    }

    /// Insert a member, replacing any existing member with the same name.
    pub fn upsert(&self, member: Member) {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        match members.iter_mut().find(|m| m.name == member.name) {
            Some(existing) => *existing = member,
            None => members.push(member),
        }
    }

    /// Change the status of a known member. Returns false if the name is unknown.
    pub fn set_status(&self, name: &str, status: MemberStatus) -> bool {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        match members.iter_mut().find(|m| m.name == name) {
            Some(member) => {
                member.status = status;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> Option<Member> {
        let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
        let index = members.iter().position(|m| m.name == name)?;
        Some(members.remove(index))
    }

    /// Fold a membership event into the snapshot.
    ///
    /// Joins and updates upsert as alive, leaves mark `Left`, failures mark
    /// `Failed`, reaps drop the member. User events and queries are ignored.
    pub fn apply(&self, event: &MembershipEvent) {
        match event {
            MembershipEvent::MemberJoin { members } | MembershipEvent::MemberUpdate { members } => {
                for member in members {
                    self.upsert(member.clone().with_status(MemberStatus::Alive));
                }
            }
            MembershipEvent::MemberLeave { members } => {
                for member in members {
                    self.upsert(member.clone().with_status(MemberStatus::Left));
                }
            }
            MembershipEvent::MemberFailed { members } => {
                for member in members {
                    self.upsert(member.clone().with_status(MemberStatus::Failed));
                }
            }
            MembershipEvent::MemberReap { members } => {
                for member in members {
                    self.remove(&member.name);
                }
            }
            MembershipEvent::User { .. } | MembershipEvent::Query { .. } => {}
        }
    }

    pub fn len(&self) -> usize {
        self.members.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemberSource for StaticMembers {
    fn members(&self) -> Vec<Member> {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn server(name: &str, last: u8) -> Member {
        Member::new(name, ip(last), "consul:dc1:8300")
    }

    #[test]
    fn test_member_status_found() {
        let members = vec![
            server("a", 1),
            server("b", 2).with_status(MemberStatus::Failed),
        ];
        assert_eq!(member_status(&members, "a"), MemberStatus::Alive);
        assert_eq!(member_status(&members, "b"), MemberStatus::Failed);
    }

    #[test]
    fn test_member_status_missing() {
        assert_eq!(member_status(&[], "a"), MemberStatus::None);
        assert_eq!(member_status(&[server("a", 1)], "z"), MemberStatus::None);
    }

    #[test]
    fn test_upsert_replaces_by_name() {
        let members = StaticMembers::new();
        members.upsert(server("a", 1));
        members.upsert(server("a", 9));

        assert_eq!(members.len(), 1);
        assert_eq!(members.members()[0].addr, ip(9));
    }

    #[test]
    fn test_set_status() {
        let members = StaticMembers::from_members(vec![server("a", 1)]);

        assert!(members.set_status("a", MemberStatus::Left));
        assert_eq!(members.status_of("a"), MemberStatus::Left);
        assert!(!members.set_status("missing", MemberStatus::Left));
    }

    #[test]
    fn test_apply_event_sequence() {
        let members = StaticMembers::new();

        members.apply(&MembershipEvent::MemberJoin {
            members: vec![server("a", 1), server("b", 2)],
        });
        assert_eq!(members.status_of("a"), MemberStatus::Alive);

        members.apply(&MembershipEvent::MemberFailed {
            members: vec![server("a", 1)],
        });
        assert_eq!(members.status_of("a"), MemberStatus::Failed);

        members.apply(&MembershipEvent::MemberLeave {
            members: vec![server("b", 2)],
        });
        assert_eq!(members.status_of("b"), MemberStatus::Left);

        members.apply(&MembershipEvent::MemberReap {
            members: vec![server("b", 2)],
        });
        assert_eq!(members.status_of("b"), MemberStatus::None);
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"type":"memberJoin","members":[{"name":"s1","addr":"10.0.0.1","role":"consul:dc1:8300"}]}"#;
        let event: MembershipEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.kind(), "member-join");
        assert_eq!(event.members().len(), 1);
        assert_eq!(event.members()[0].status, MemberStatus::Alive);
        assert_eq!(event.members()[0].port, 0);
    }

    #[test]
    fn test_user_event_has_no_members() {
        let event = MembershipEvent::User {
            name: "deploy".into(),
            payload: b"v2".to_vec(),
        };
        assert!(event.members().is_empty());
        assert_eq!(event.kind(), "user");
    }
}
