//! BrainGrid node configuration
//!
//! A TOML file with one section per concern. Every field has a default, so an
//! empty file is a valid single-node configuration.

use crate::error::{NodeError, Result};
use braingrid_leader::LeaderConfig;
use braingrid_services::{CliServerConfig, RetentionConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFileConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub telemetry: TelemetrySection,

    #[serde(default)]
    pub retention: RetentionSection,

    #[serde(default)]
    pub cli: CliSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Host name used for presence and the leader record
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Address other nodes and CLI users reach this node on
    #[serde(default = "default_advertise_address")]
    pub advertise_address: String,

    /// Number of nodes to run in this process over a shared local ensemble
    #[serde(default = "default_local_nodes")]
    pub local_nodes: usize,
}

/// Cluster layout and leader-management timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSection {
    /// Coordination root path
    #[serde(default = "default_cluster_root")]
    pub root: String,

    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    #[serde(default = "default_transition_interval_ms")]
    pub transition_interval_ms: u64,

    /// Election re-list period when no watch event arrives
    #[serde(default = "default_election_poll_fallback_ms")]
    pub election_poll_fallback_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// Leader aggregation period
    #[serde(default = "default_aggregation_interval_ms")]
    pub aggregation_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSection {
    /// Age after which log records are purged
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliSection {
    /// Mailbox scan period on the leader
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// `$HOSTNAME`, then `/etc/hostname`, then `localhost`.
pub fn default_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    if let Ok(contents) = std::fs::read_to_string("/etc/hostname") {
        let name = contents.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "localhost".to_string()
}

fn default_advertise_address() -> String {
    "127.0.0.1".to_string()
}

fn default_local_nodes() -> usize {
    1
}

fn default_cluster_root() -> String {
    "braingrid".to_string()
}

fn default_watchdog_interval_ms() -> u64 {
    1000
}

fn default_transition_interval_ms() -> u64 {
    500
}

fn default_election_poll_fallback_ms() -> u64 {
    500
}

fn default_aggregation_interval_ms() -> u64 {
    5000
}

fn default_retention_hours() -> u64 {
    168
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_scan_interval_ms() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            advertise_address: default_advertise_address(),
            local_nodes: default_local_nodes(),
        }
    }
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            root: default_cluster_root(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            transition_interval_ms: default_transition_interval_ms(),
            election_poll_fallback_ms: default_election_poll_fallback_ms(),
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            aggregation_interval_ms: default_aggregation_interval_ms(),
        }
    }
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for CliSection {
    fn default() -> Self {
        Self {
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl NodeFileConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: NodeFileConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.local_nodes == 0 {
            return Err(NodeError::Config("node.local_nodes must be at least 1".into()));
        }
        if self.telemetry.aggregation_interval_ms == 0
            || self.retention.sweep_interval_secs == 0
            || self.cli.scan_interval_ms == 0
        {
            return Err(NodeError::Config("service intervals must be non-zero".into()));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(NodeError::Config(format!(
                "logging.format must be text or json, got {:?}",
                self.logging.format
            )));
        }

        for name in self.node_names() {
            self.leader_config(&name).validate()?;
        }
        Ok(())
    }

    /// Host names of the nodes this process runs. A single node keeps the
    /// configured name; several get a numeric suffix.
    pub fn node_names(&self) -> Vec<String> {
        match self.node.local_nodes {
            1 => vec![self.node.hostname.clone()],
            n => (1..=n)
                .map(|i| format!("{}-{}", self.node.hostname, i))
                .collect(),
        }
    }

    pub fn leader_config(&self, hostname: &str) -> LeaderConfig {
        LeaderConfig::new(hostname)
            .with_cluster_root(self.cluster.root.clone())
            .with_advertise_address(self.node.advertise_address.clone())
            .with_watchdog_interval(Duration::from_millis(self.cluster.watchdog_interval_ms))
            .with_transition_interval(Duration::from_millis(self.cluster.transition_interval_ms))
            .with_election_poll_fallback(Duration::from_millis(
                self.cluster.election_poll_fallback_ms,
            ))
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            aggregation_interval: Duration::from_millis(self.telemetry.aggregation_interval_ms),
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            retention: Duration::from_secs(self.retention.retention_hours * 3600),
            sweep_interval: Duration::from_secs(self.retention.sweep_interval_secs),
        }
    }

    pub fn cli_config(&self) -> CliServerConfig {
        CliServerConfig {
            scan_interval: Duration::from_millis(self.cli.scan_interval_ms),
        }
    }
}
