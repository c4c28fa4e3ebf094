//! # BrainGrid Core
//!
//! Shared building blocks for the BrainGrid cluster control plane.
//!
//! Every node of a BrainGrid cluster connects to a linearizable coordination
//! service and derives its role (leader or follower) from a handful of
//! ephemeral entries stored there. This crate holds the pieces every other
//! crate agrees on:
//!
//! - **Domain types**: [`NodeIdentity`], [`ClusterRole`], [`LeaderRecord`],
//!   [`RoleTransitionEvent`] and [`MembershipDelta`]
//! - **Path layout**: [`ClusterPaths`], the hierarchical key layout shared by
//!   every node and tool that talks to the cluster
//! - **Coordination capability**: the [`CoordinationClient`] trait consumed by
//!   the election and membership machinery
//! - **Election recipe**: [`ElectionRecipe`], the FIFO leader-election primitive
//!   built on sequential ephemeral entries
//! - **Error handling**: [`CoordError`] and its transient/fatal classification
//!
//! ## Example
//!
//! ```rust
//! use braingrid_core::{ClusterPaths, LeaderRecord};
//!
//! let paths = ClusterPaths::new("braingrid");
//! assert_eq!(paths.leader(), "/braingrid/System/Leader");
//!
//! let record = LeaderRecord::new("node-a", "10.0.0.1");
//! let bytes = record.to_bytes().unwrap();
//! assert_eq!(LeaderRecord::from_slice(&bytes).unwrap(), record);
//! ```

pub mod coordination;
pub mod election;
pub mod error;
pub mod paths;
pub mod types;

pub use coordination::{CoordinationClient, CreateMode, WatchEvent, WatchKind, Watcher};
pub use election::{ElectionRecipe, ElectionTicket};
pub use error::{CoordError, CoordResult};
pub use paths::ClusterPaths;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_record_wire_format() {
        let record = LeaderRecord::new("node-a", "10.0.0.1");
        let json = String::from_utf8(record.to_bytes().unwrap().to_vec()).unwrap();

        assert_eq!(json, r#"{"Hostname":"node-a","IP":"10.0.0.1"}"#);
    }

    #[test]
    fn test_error_classification() {
        let error = CoordError::connection_loss("ensemble unreachable");
        assert!(error.is_retryable());
        assert!(!error.is_session_loss());

        let error = CoordError::ConnectionClosed {
            session: SessionId(7),
        };
        assert!(!error.is_retryable());
        assert!(error.is_session_loss());
    }
}
