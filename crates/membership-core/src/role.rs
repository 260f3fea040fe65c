//! Server role tags advertised over gossip.
//!
//! A consensus server advertises its role as `consul:<datacenter>:<port>`.
//! The port is the one serving the peer-management (RPC) protocol, which is
//! not the gossip port the member was discovered on.

use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use crate::gossip::Member;
use std::str::FromStr;
use thiserror::Error;
use tracing::error;

/// Marker that prefixes every server role tag.
pub const SERVER_ROLE_MARKER: &str = "consul";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("Not a server role: {0:?}")]
    NotServer(String),
    #[error("Missing datacenter or port in role: {0:?}")]
    MissingField(String),
    #[error("Invalid port in role {role:?}: {source}")]
    InvalidPort {
        role: String,
        #[source]
        source: ParseIntError,
    },
}

impl RoleError {
    /// Malformed server roles are worth reporting; plain non-server roles are not.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, RoleError::NotServer(_))
    }
}

/// A parsed server role: the datacenter a server belongs to and its RPC port.
///
/// # Examples
/// ```
/// use membership_core::ServerRole;
///
/// let role: ServerRole = "consul:dc1:8300".parse().unwrap();
/// assert_eq!(role.datacenter, "dc1");
/// assert_eq!(role.port, 8300);
/// assert_eq!(role.to_tag(), "consul:dc1:8300");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerRole {
    pub datacenter: String,
    pub port: u16,
}

impl ServerRole {
    pub fn new(datacenter: impl Into<String>, port: u16) -> Self {
        Self {
            datacenter: datacenter.into(),
            port,
        }
    }

    /// Parse a role tag.
    ///
    /// The part after the marker is split on the first `:` only, so anything
    /// trailing the port stays in the port field and fails numeric parsing.
    pub fn parse(role: &str) -> Result<Self, RoleError> {
        let rest = role
            .strip_prefix(SERVER_ROLE_MARKER)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| RoleError::NotServer(role.to_string()))?;

        let (datacenter, port) = rest
            .split_once(':')
            .ok_or_else(|| RoleError::MissingField(role.to_string()))?;
        if datacenter.is_empty() {
            return Err(RoleError::MissingField(role.to_string()));
        }

        let port = port.parse::<u16>().map_err(|source| RoleError::InvalidPort {
            role: role.to_string(),
            source,
        })?;

        Ok(Self::new(datacenter, port))
    }

    /// Render the wire form, `consul:<datacenter>:<port>`.
    pub fn to_tag(&self) -> String {
        self.to_string()
    }

    /// Address of the server's RPC endpoint given its gossip IP.
    pub fn server_addr(&self, ip: IpAddr) -> SocketAddr {
        SocketAddr::new(ip, self.port)
    }
}

impl Display for ServerRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", SERVER_ROLE_MARKER, self.datacenter, self.port)
    }
}

impl FromStr for ServerRole {
    type Err = RoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// What a role tag says about a member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberFact {
    pub is_server: bool,
    pub datacenter: String,
    pub port: u16,
}

impl MemberFact {
    pub fn non_server() -> Self {
        Self::default()
    }

    /// The role a server fact was classified from.
    pub fn server_role(&self) -> Option<ServerRole> {
        self.is_server
            .then(|| ServerRole::new(self.datacenter.as_str(), self.port))
    }
}

impl From<ServerRole> for MemberFact {
    fn from(role: ServerRole) -> Self {
        Self {
            is_server: true,
            datacenter: role.datacenter,
            port: role.port,
        }
    }
}

/// Classify a member by its role tag.
///
/// Plain non-server roles classify as `MemberFact::non_server()`. A malformed
/// server role is logged here and returned as the error; callers treat it as
/// a non-server and must not log it again.
pub fn classify(member: &Member) -> Result<MemberFact, RoleError> {
    match ServerRole::parse(&member.role) {
        Ok(role) => Ok(role.into()),
        Err(e) if !e.is_malformed() => Ok(MemberFact::non_server()),
        Err(e) => {
            error!("Failed to parse role of {}: {}", member.name, e);
            Err(e)
        }
    }
}
