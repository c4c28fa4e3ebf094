use crate::{LeaderError, LeaderResult};
use braingrid_core::ClusterPaths;
use std::time::Duration;

/// Configuration for a node's leader-management machinery
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// Coordination root under which every cluster path lives
    pub cluster_root: String,

    /// This node's host name, used for its presence entry and leader record
    pub hostname: String,

    /// Address advertised in the leader record
    pub advertise_address: String,

    /// Delay between watchdog iterations
    pub watchdog_interval: Duration,

    /// Delay between role-transition manager iterations
    pub transition_interval: Duration,

    /// How long the election recipe waits for a watch event before re-listing
    pub election_poll_fallback: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            cluster_root: "braingrid".to_string(),
            hostname: "localhost".to_string(),
            advertise_address: "127.0.0.1".to_string(),
            watchdog_interval: Duration::from_millis(1000),
            transition_interval: Duration::from_millis(500),
            election_poll_fallback: Duration::from_millis(500),
        }
    }
}

impl LeaderConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    pub fn with_cluster_root(mut self, root: impl Into<String>) -> Self {
        self.cluster_root = root.into();
        self
    }

    pub fn with_advertise_address(mut self, address: impl Into<String>) -> Self {
        self.advertise_address = address.into();
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_transition_interval(mut self, interval: Duration) -> Self {
        self.transition_interval = interval;
        self
    }

    pub fn with_election_poll_fallback(mut self, interval: Duration) -> Self {
        self.election_poll_fallback = interval;
        self
    }

    pub fn paths(&self) -> ClusterPaths {
        ClusterPaths::new(&self.cluster_root)
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.hostname.is_empty() || self.hostname.contains('/') {
            return Err(LeaderError::ConfigError {
                reason: format!("invalid hostname {:?}", self.hostname),
            });
        }
        if self.cluster_root.trim_matches('/').is_empty() {
            return Err(LeaderError::ConfigError {
                reason: "cluster_root cannot be empty".to_string(),
            });
        }
        if self.watchdog_interval.is_zero() || self.transition_interval.is_zero() {
            return Err(LeaderError::ConfigError {
                reason: "intervals must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
