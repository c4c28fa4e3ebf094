//! Assembly of one cluster node's leader-management machinery.

use crate::{
    Dependent, ElectionEngine, LeaderConfig, LeaderError, LeaderNotificationBus, LeaderResult,
    LeaderWatchdog, MembershipRegistrar, RoleTransitionManager, RoleWatch,
};
use braingrid_core::{
    ClusterPaths, ClusterRole, CoordinationClient, LeaderRecord, MembershipSet, NodeIdentity,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Cheap, cloneable view of a running node for subsystems and tooling.
#[derive(Clone)]
pub struct NodeHandle {
    identity: NodeIdentity,
    paths: ClusterPaths,
    client: Arc<dyn CoordinationClient>,
    engine: Arc<ElectionEngine>,
    registrar: Arc<MembershipRegistrar>,
    notifications: Arc<LeaderNotificationBus>,
}

impl NodeHandle {
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn hostname(&self) -> &str {
        self.identity.name()
    }

    pub fn paths(&self) -> &ClusterPaths {
        &self.paths
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    pub fn engine(&self) -> &Arc<ElectionEngine> {
        &self.engine
    }

    pub fn notifications(&self) -> &Arc<LeaderNotificationBus> {
        &self.notifications
    }

    pub fn role(&self) -> ClusterRole {
        self.engine.role()
    }

    pub fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    pub fn subscribe(&self) -> RoleWatch {
        self.engine.subscribe()
    }

    pub async fn leader_record(&self) -> LeaderResult<Option<LeaderRecord>> {
        self.engine.leader_record().await
    }

    pub async fn list_members(&self) -> LeaderResult<MembershipSet> {
        self.registrar.list_members().await
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("identity", &self.identity)
            .field("role", &self.role())
            .finish()
    }
}

/// One cluster node: membership, election, watchdog and transition manager
/// wired to a single coordination session.
pub struct ClusterNode {
    config: LeaderConfig,
    handle: NodeHandle,
    watchdog: Arc<LeaderWatchdog>,
    transitions: RoleTransitionManager,
}

impl ClusterNode {
    pub fn new(client: Arc<dyn CoordinationClient>, config: LeaderConfig) -> LeaderResult<Self> {
        config.validate()?;

        let identity = NodeIdentity::new(config.hostname.clone(), client.session_id());
        let paths = config.paths();
        let notifications = Arc::new(LeaderNotificationBus::new());

        let engine = Arc::new(ElectionEngine::new(
            Arc::clone(&client),
            identity.clone(),
            &config,
            Arc::clone(&notifications),
        ));
        let registrar = Arc::new(MembershipRegistrar::new(
            Arc::clone(&client),
            identity.clone(),
            paths.clone(),
            config.advertise_address.clone(),
        ));
        let watchdog = Arc::new(LeaderWatchdog::new(
            Arc::clone(&client),
            Arc::clone(&engine),
            Arc::clone(&registrar),
            Arc::clone(&notifications),
            config.watchdog_interval,
        ));
        let transitions =
            RoleTransitionManager::new(engine.subscribe(), config.transition_interval);

        info!("Created cluster node {}", identity);

        Ok(Self {
            config,
            handle: NodeHandle {
                identity,
                paths,
                client,
                engine,
                registrar,
                notifications,
            },
            watchdog,
            transitions,
        })
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn watchdog(&self) -> &Arc<LeaderWatchdog> {
        &self.watchdog
    }

    /// Adds a dependent subsystem. Registration order is call order.
    pub fn register(&mut self, dependent: Arc<dyn Dependent>) {
        self.transitions.register(dependent);
    }

    /// Creates the persistent path layout, registers presence and runs the
    /// initial election.
    pub async fn bootstrap(&self) -> LeaderResult<ClusterRole> {
        for parent in self.handle.paths.persistent_parents() {
            self.handle
                .client
                .ensure_path(&parent)
                .await
                .map_err(LeaderError::from_coord)?;
        }

        self.handle.registrar.register_presence().await?;
        let role = self.handle.engine.auto_init_leader().await?;
        info!(node = %self.handle.identity, "Bootstrapped as {}", role);
        Ok(role)
    }

    /// Runs the node until `shutdown` flips to `true` or a fatal error occurs,
    /// then tears everything down.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> LeaderResult<()> {
        let outcome = match self.bootstrap().await {
            Ok(_) => self.serve(shutdown).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            error!(node = %self.handle.identity, "Node stopping after error: {}", e);
        }

        let teardown = self.transitions.shutdown_system().await;
        if let Err(e) = &teardown {
            warn!("Dependent shutdown reported a failure: {}", e);
        }

        if !matches!(outcome, Err(LeaderError::SessionLost { .. })) {
            if let Err(e) = self.handle.engine.resign().await {
                warn!("Failed to resign leadership: {}", e);
            }
            if let Err(e) = self.handle.client.close().await {
                warn!("Failed to close coordination session: {}", e);
            }
        }

        info!(node = %self.handle.identity, "Node stopped");
        outcome.and(teardown)
    }

    async fn serve(&mut self, shutdown: watch::Receiver<bool>) -> LeaderResult<()> {
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut watchdog_task = tokio::spawn({
            let watchdog = Arc::clone(&self.watchdog);
            async move { watchdog.run(stop_rx).await }
        });

        let mut watchdog_finished = false;
        let outcome = tokio::select! {
            result = self.transitions.run(shutdown) => result,
            joined = &mut watchdog_task => {
                watchdog_finished = true;
                flatten(joined)
            }
        };

        let _ = stop_tx.send(true);
        if !watchdog_finished {
            if let Err(e) = flatten(watchdog_task.await) {
                warn!("Watchdog ended with error: {}", e);
            }
        }

        outcome
    }
}

fn flatten(joined: Result<LeaderResult<()>, tokio::task::JoinError>) -> LeaderResult<()> {
    joined.map_err(|e| LeaderError::Internal {
        reason: format!("watchdog task failed: {}", e),
    })?
}
