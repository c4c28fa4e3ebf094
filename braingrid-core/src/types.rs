//! # Core Types
//!
//! Fundamental types shared by every component of a BrainGrid node.

use crate::{CoordError, CoordResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Opaque identifier of a coordination-service session.
///
/// Every ephemeral entry is owned by exactly one session and disappears when
/// that session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Returns the raw numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Identity of this node for the lifetime of the process.
///
/// Created once at startup from the host name and the coordination session;
/// there is no way to mutate it afterwards.
///
/// # Examples
///
/// ```rust
/// use braingrid_core::{NodeIdentity, SessionId};
///
/// let identity = NodeIdentity::new("node-a", SessionId(1));
/// assert_eq!(identity.name(), "node-a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity {
    name: String,
    session_id: SessionId,
}

impl NodeIdentity {
    /// Creates the identity for a node.
    pub fn new(name: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            name: name.into(),
            session_id,
        }
    }

    /// The node's host name, also the name of its presence entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The coordination session this node runs under.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.session_id)
    }
}

/// The node's current cluster responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterRole {
    /// Not the leader. Every node starts here.
    #[default]
    Follower,
    /// Holder of the leader lock.
    Leader,
}

impl ClusterRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, ClusterRole::Leader)
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Follower => write!(f, "FOLLOWER"),
            ClusterRole::Leader => write!(f, "LEADER"),
        }
    }
}

/// Value of the leader lock entry.
///
/// Serialized as `{"Hostname": <string>, "IP": <string>}` so that any
/// implementation reading the same ensemble can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRecord {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "IP")]
    pub address: String,
}

impl LeaderRecord {
    pub fn new(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
        }
    }

    /// Encodes the record as the lock entry's value.
    pub fn to_bytes(&self) -> CoordResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes a lock entry's value.
    pub fn from_slice(data: &[u8]) -> CoordResult<Self> {
        serde_json::from_slice(data).map_err(CoordError::from)
    }

    /// Whether the record names the given host as leader.
    pub fn is_owned_by(&self, hostname: &str) -> bool {
        self.hostname == hostname
    }
}

impl fmt::Display for LeaderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hostname, self.address)
    }
}

/// A detected role change. Produced once, consumed once, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTransitionEvent {
    pub previous_role: ClusterRole,
    pub new_role: ClusterRole,
}

impl RoleTransitionEvent {
    pub fn new(previous_role: ClusterRole, new_role: ClusterRole) -> Self {
        Self {
            previous_role,
            new_role,
        }
    }

    pub fn is_promotion(&self) -> bool {
        !self.previous_role.is_leader() && self.new_role.is_leader()
    }

    pub fn is_demotion(&self) -> bool {
        self.previous_role.is_leader() && !self.new_role.is_leader()
    }
}

impl fmt::Display for RoleTransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.previous_role, self.new_role)
    }
}

/// Ordered set of node names currently holding a presence entry.
pub type MembershipSet = BTreeSet<String>;

/// Difference between two membership observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub joined: MembershipSet,
    pub left: MembershipSet,
}

impl MembershipDelta {
    /// Computes which names joined and which left between two observations.
    pub fn between(previous: &MembershipSet, current: &MembershipSet) -> Self {
        Self {
            joined: current.difference(previous).cloned().collect(),
            left: previous.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> MembershipSet {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_membership_delta() {
        let previous = set(&["a", "b", "c"]);
        let current = set(&["b", "c", "d"]);

        let delta = MembershipDelta::between(&previous, &current);
        assert_eq!(delta.joined, set(&["d"]));
        assert_eq!(delta.left, set(&["a"]));
        assert!(!delta.is_empty());

        assert!(MembershipDelta::between(&current, &current).is_empty());
    }

    #[test]
    fn test_leader_record_rejects_garbage() {
        let result = LeaderRecord::from_slice(b"not json");
        assert!(matches!(result, Err(CoordError::Serialization { .. })));
    }

    #[test]
    fn test_leader_record_reads_foreign_writer() {
        let record =
            LeaderRecord::from_slice(br#"{"IP": "192.168.1.4", "Hostname": "sim-07"}"#).unwrap();
        assert!(record.is_owned_by("sim-07"));
        assert!(!record.is_owned_by("sim-08"));
        assert_eq!(record.address, "192.168.1.4");
    }

    #[test]
    fn test_transition_event_direction() {
        let up = RoleTransitionEvent::new(ClusterRole::Follower, ClusterRole::Leader);
        assert!(up.is_promotion());
        assert!(!up.is_demotion());

        let down = RoleTransitionEvent::new(ClusterRole::Leader, ClusterRole::Follower);
        assert!(down.is_demotion());
        assert_eq!(down.to_string(), "LEADER -> FOLLOWER");
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(255).to_string(), "0x00000000000000ff");
    }
}
