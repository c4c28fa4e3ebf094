//! # BrainGrid Leader
//!
//! Cluster membership, leader election and role-transition management for
//! BrainGrid nodes.
//!
//! This crate provides functionality for:
//! - Presence registration and membership deltas ([`MembershipRegistrar`])
//! - Leader election guarded by an ephemeral lock ([`ElectionEngine`])
//! - Leader liveness and self-healing membership ([`LeaderWatchdog`])
//! - Fan-out of role changes to dependent subsystems ([`RoleTransitionManager`])
//! - Leadership and topology notifications ([`LeaderNotificationBus`])
//!
//! [`ClusterNode`] wires these together over one coordination session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use braingrid_coord::{Ensemble, EnsembleConfig};
//! use braingrid_leader::{ClusterNode, LeaderConfig};
//!
//! # async fn example() -> braingrid_leader::LeaderResult<()> {
//! let ensemble = Ensemble::new(EnsembleConfig::default());
//! let node = ClusterNode::new(Arc::new(ensemble.connect()), LeaderConfig::new("node-a"))?;
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! node.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod election;
pub mod errors;
pub mod membership;
pub mod node;
pub mod notifications;
pub mod transition;
pub mod watchdog;

pub use config::LeaderConfig;
pub use election::{ElectionEngine, ElectionState, ElectionStats, RoleWatch};
pub use errors::{LeaderError, LeaderResult};
pub use membership::MembershipRegistrar;
pub use node::{ClusterNode, NodeHandle};
pub use notifications::{
    LeaderNotification, LeaderNotificationBus, LeadershipChange, NotificationFilter,
    NotificationStats, SubscriptionId, TopologyChange,
};
pub use transition::{Dependent, DependentFailure, Dispatch, RoleTransitionManager, TransitionReport};
pub use watchdog::{LeaderWatchdog, WatchdogReport};
