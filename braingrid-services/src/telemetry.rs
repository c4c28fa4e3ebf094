//! Per-node system statistics and the leader's cluster aggregator.

use crate::daemon::Daemon;
use crate::{ServiceError, ServiceResult};
use async_trait::async_trait;
use braingrid_core::{ClusterPaths, CoordinationClient, CreateMode};
use braingrid_leader::{Dependent, NodeHandle};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::System;
use tracing::{debug, info, warn};

/// Statistics one node publishes about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub hostname: String,
    pub cpu_count: usize,
    pub cpu_usage_percent: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub sampled_at_ms: u64,
}

impl SystemStats {
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 * 100.0 / self.memory_total_bytes as f64
    }
}

/// Source of the local node's statistics
pub trait StatsSource: Send + Sync {
    fn sample(&self, hostname: &str) -> anyhow::Result<SystemStats>;
}

/// Samples CPU and memory through `sysinfo`.
pub struct SysinfoSource {
    system: Mutex<System>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for SysinfoSource {
    fn sample(&self, hostname: &str) -> anyhow::Result<SystemStats> {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        Ok(SystemStats {
            hostname: hostname.to_string(),
            cpu_count: system.cpus().len(),
            cpu_usage_percent: system.global_cpu_info().cpu_usage(),
            memory_total_bytes: system.total_memory(),
            memory_used_bytes: system.used_memory(),
            sampled_at_ms: now_millis(),
        })
    }
}

/// Telemetry of every node, as last collected by the leader
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub nodes: BTreeMap<String, SystemStats>,
    pub collected_at_ms: u64,
}

impl ClusterSnapshot {
    pub fn total_memory_bytes(&self) -> u64 {
        self.nodes.values().map(|s| s.memory_total_bytes).sum()
    }

    pub fn average_cpu_usage(&self) -> f32 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.nodes.values().map(|s| s.cpu_usage_percent).sum::<f32>() / self.nodes.len() as f32
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Delay between aggregation passes on the leader
    pub aggregation_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: Duration::from_secs(5),
        }
    }
}

/// Publishes this node's stats on every lifecycle call and, on the leader,
/// aggregates everyone's.
pub struct TelemetryManager {
    client: Arc<dyn CoordinationClient>,
    paths: ClusterPaths,
    hostname: String,
    source: Arc<dyn StatsSource>,
    config: TelemetryConfig,
    snapshot: Arc<RwLock<ClusterSnapshot>>,
    aggregator: tokio::sync::Mutex<Option<Daemon>>,
}

impl TelemetryManager {
    pub fn new(node: &NodeHandle, source: Arc<dyn StatsSource>, config: TelemetryConfig) -> Self {
        Self {
            client: Arc::clone(node.client()),
            paths: node.paths().clone(),
            hostname: node.hostname().to_string(),
            source,
            config,
            snapshot: Arc::new(RwLock::new(ClusterSnapshot::default())),
            aggregator: tokio::sync::Mutex::new(None),
        }
    }

    /// Latest aggregated snapshot. Empty on followers.
    pub fn snapshot(&self) -> ClusterSnapshot {
        self.snapshot.read().clone()
    }

    pub async fn is_aggregating(&self) -> bool {
        self.aggregator
            .lock()
            .await
            .as_ref()
            .map(Daemon::is_running)
            .unwrap_or(false)
    }

    /// Writes this node's current stats into its telemetry entry.
    pub async fn publish(&self) -> ServiceResult<SystemStats> {
        let stats = self.source.sample(&self.hostname)?;
        let path = self.paths.telemetry_node(&self.hostname);
        let data = Bytes::from(serde_json::to_vec(&stats)?);

        match self.client.set(&path, data.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_no_node() => {
                match self.client.create(&path, data, CreateMode::Ephemeral).await {
                    Ok(_) => debug!("Created telemetry entry {}", path),
                    Err(e) if e.is_node_exists() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        Ok(stats)
    }

    /// Reads every node's telemetry entry into one snapshot.
    pub async fn collect(
        client: &dyn CoordinationClient,
        paths: &ClusterPaths,
    ) -> ServiceResult<ClusterSnapshot> {
        let mut snapshot = ClusterSnapshot {
            nodes: BTreeMap::new(),
            collected_at_ms: now_millis(),
        };

        for host in client.children(&paths.telemetry()).await? {
            let data = match client.get(&paths.telemetry_node(&host)).await {
                Ok(data) => data,
                Err(e) if e.is_no_node() => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<SystemStats>(&data) {
                Ok(stats) => {
                    snapshot.nodes.insert(host, stats);
                }
                Err(e) => warn!("Ignoring malformed telemetry from {}: {}", host, e),
            }
        }

        Ok(snapshot)
    }

    async fn start_aggregator(&self) {
        let mut aggregator = self.aggregator.lock().await;
        if aggregator.as_ref().map(Daemon::is_running).unwrap_or(false) {
            return;
        }

        let client = Arc::clone(&self.client);
        let paths = self.paths.clone();
        let snapshot = Arc::clone(&self.snapshot);

        *aggregator = Some(Daemon::spawn(
            "telemetry-aggregator",
            self.config.aggregation_interval,
            move || {
                let client = Arc::clone(&client);
                let paths = paths.clone();
                let snapshot = Arc::clone(&snapshot);
                async move {
                    match TelemetryManager::collect(client.as_ref(), &paths).await {
                        Ok(collected) => {
                            debug!("Aggregated telemetry from {} nodes", collected.nodes.len());
                            *snapshot.write() = collected;
                        }
                        Err(e) => warn!("Telemetry aggregation failed: {}", e),
                    }
                }
            },
        ));
        info!("Telemetry aggregation started");
    }

    async fn stop_aggregator(&self) {
        if let Some(daemon) = self.aggregator.lock().await.take() {
            daemon.stop().await;
            *self.snapshot.write() = ClusterSnapshot::default();
            info!("Telemetry aggregation stopped");
        }
    }
}

#[async_trait]
impl Dependent for TelemetryManager {
    fn name(&self) -> &str {
        "telemetry"
    }

    async fn transition_leader(&self) -> anyhow::Result<()> {
        self.start_aggregator().await;
        self.publish().await?;
        Ok(())
    }

    async fn transition_follower(&self) -> anyhow::Result<()> {
        self.stop_aggregator().await;
        self.publish().await?;
        Ok(())
    }

    async fn update_leader(&self) -> anyhow::Result<()> {
        // Restart aggregation if the task died.
        self.start_aggregator().await;
        self.publish().await?;
        Ok(())
    }

    async fn update_follower(&self) -> anyhow::Result<()> {
        self.publish().await?;
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop_aggregator().await;
        match self
            .client
            .delete(&self.paths.telemetry_node(&self.hostname))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_no_node() || e.is_session_loss() => Ok(()),
            Err(e) => Err(ServiceError::from(e).into()),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
