//! Multi-node cluster harness over one in-process ensemble.

use crate::recording::{CallLog, RecordingDependent};
use braingrid_coord::{Ensemble, EnsembleConfig, EnsembleSession};
use braingrid_core::{ClusterPaths, LeaderRecord};
use braingrid_leader::{
    ClusterNode, Dependent, LeaderConfig, LeaderError, LeaderResult, NodeHandle,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Timing and layout shared by every node of a harness
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub cluster_root: String,
    pub watchdog_interval: Duration,
    pub transition_interval: Duration,
    pub election_poll_fallback: Duration,
    pub op_latency: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            cluster_root: "harness".to_string(),
            watchdog_interval: Duration::from_millis(100),
            transition_interval: Duration::from_millis(25),
            election_poll_fallback: Duration::from_millis(25),
            op_latency: Duration::ZERO,
        }
    }
}

impl HarnessConfig {
    pub fn leader_config(&self, hostname: &str) -> LeaderConfig {
        LeaderConfig::new(hostname)
            .with_cluster_root(self.cluster_root.clone())
            .with_advertise_address("127.0.0.1")
            .with_watchdog_interval(self.watchdog_interval)
            .with_transition_interval(self.transition_interval)
            .with_election_poll_fallback(self.election_poll_fallback)
    }
}

/// A node running inside the harness
pub struct HarnessNode {
    pub session: EnsembleSession,
    pub handle: NodeHandle,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<LeaderResult<()>>>,
}

impl HarnessNode {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    pub fn is_leader(&self) -> bool {
        self.is_running() && self.handle.is_leader()
    }

    /// Waits for the node's run loop to end and returns its outcome.
    pub async fn join(&mut self) -> Option<LeaderResult<()>> {
        let task = self.task.take()?;
        Some(task.await.unwrap_or_else(|e| {
            Err(LeaderError::Internal {
                reason: e.to_string(),
            })
        }))
    }
}

/// N cluster nodes sharing one ensemble.
pub struct ClusterHarness {
    ensemble: Arc<Ensemble>,
    admin: EnsembleSession,
    config: HarnessConfig,
    paths: ClusterPaths,
    log: CallLog,
    nodes: BTreeMap<String, HarnessNode>,
}

impl ClusterHarness {
    pub fn new(config: HarnessConfig) -> Self {
        let ensemble = Ensemble::new(EnsembleConfig::default().with_op_latency(config.op_latency));
        let admin = ensemble.connect();
        let paths = ClusterPaths::new(&config.cluster_root);

        Self {
            ensemble,
            admin,
            config,
            paths,
            log: CallLog::new(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn ensemble(&self) -> &Arc<Ensemble> {
        &self.ensemble
    }

    /// A session outside every node, for inspecting and tampering with the tree
    pub fn admin(&self) -> &EnsembleSession {
        &self.admin
    }

    pub fn paths(&self) -> &ClusterPaths {
        &self.paths
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn node(&self, name: &str) -> Option<&HarnessNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut HarnessNode> {
        self.nodes.get_mut(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Starts a node with a single recording dependent named `recorder`.
    pub fn start_node(&mut self, name: &str) -> LeaderResult<NodeHandle> {
        let recorder = RecordingDependent::new(name, "recorder", &self.log).into_arc();
        self.start_node_with(name, vec![recorder])
    }

    /// Starts a node with the given dependents, in registration order.
    pub fn start_node_with(
        &mut self,
        name: &str,
        dependents: Vec<Arc<dyn Dependent>>,
    ) -> LeaderResult<NodeHandle> {
        self.start_node_built(name, move |_| dependents)
    }

    /// Starts a node whose dependents need its handle, such as the services
    /// in `braingrid-services`.
    pub fn start_node_built<F>(&mut self, name: &str, build: F) -> LeaderResult<NodeHandle>
    where
        F: FnOnce(&NodeHandle) -> Vec<Arc<dyn Dependent>>,
    {
        let session = self.ensemble.connect();
        let mut node = ClusterNode::new(Arc::new(session.clone()), self.config.leader_config(name))?;
        for dependent in build(&node.handle()) {
            node.register(dependent);
        }

        let handle = node.handle();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(node.run(stop_rx));

        info!("Harness started node {} on session {}", name, session.id());
        self.nodes.insert(
            name.to_string(),
            HarnessNode {
                session,
                handle: handle.clone(),
                stop_tx,
                task: Some(task),
            },
        );
        Ok(handle)
    }

    /// Starts several nodes at once.
    pub fn start_nodes(&mut self, names: &[&str]) -> LeaderResult<()> {
        for name in names {
            self.start_node(name)?;
        }
        Ok(())
    }

    /// Gracefully stops one node and returns its run outcome.
    pub async fn stop_node(&mut self, name: &str) -> Option<LeaderResult<()>> {
        let node = self.nodes.get_mut(name)?;
        let _ = node.stop_tx.send(true);
        node.join().await
    }

    /// Stops every node still running.
    pub async fn shutdown(&mut self) {
        for name in self.names() {
            if let Some(Err(e)) = self.stop_node(&name).await {
                warn!("Node {} stopped with error: {}", name, e);
            }
        }
    }

    /// Current content of the leader lock.
    pub fn leader_record(&self) -> Option<LeaderRecord> {
        self.ensemble
            .entry(&self.paths.leader())
            .and_then(|entry| LeaderRecord::from_slice(&entry.data).ok())
    }

    /// Running nodes that believe they are leader.
    pub fn self_declared_leaders(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.is_leader())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names holding a presence entry.
    pub fn registered_members(&self) -> Vec<String> {
        let prefix = format!("{}/", self.paths.nodes());
        self.ensemble
            .snapshot()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Waits until the lock names a running node that also sees itself as
    /// leader, and returns that node's name.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<String> {
        let mut found = None;
        wait_until(timeout, || {
            found = self.settled_leader();
            std::future::ready(found.is_some())
        })
        .await;
        found
    }

    /// Like [`wait_for_leader`](Self::wait_for_leader), but requires a leader
    /// different from `previous`.
    pub async fn wait_for_new_leader(&self, previous: &str, timeout: Duration) -> Option<String> {
        let mut found = None;
        wait_until(timeout, || {
            found = self.settled_leader().filter(|name| name != previous);
            std::future::ready(found.is_some())
        })
        .await;
        found
    }

    fn settled_leader(&self) -> Option<String> {
        let record = self.leader_record()?;
        let node = self.nodes.get(&record.hostname)?;
        node.is_leader().then_some(record.hostname)
    }
}

/// Polls `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
