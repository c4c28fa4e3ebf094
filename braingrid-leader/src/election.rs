//! Leader election and the leader lock.
//!
//! The [`ElectionEngine`] is the only writer of this node's election state.
//! Everything else observes it through a [`RoleWatch`].

use crate::{LeaderConfig, LeaderError, LeaderNotificationBus, LeaderResult};
use braingrid_core::{
    ClusterPaths, ClusterRole, CoordinationClient, CreateMode, ElectionRecipe, LeaderRecord,
    NodeIdentity, RoleTransitionEvent,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Election state machine of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ElectionState {
    /// Not leader and not contending
    #[default]
    Follower,

    /// Queued in the election recipe or attempting the lock
    ElectionInProgress,

    /// Holder of the leader lock
    Leader,
}

impl ElectionState {
    /// The externally visible role. An election in progress reads as Follower.
    pub fn role(&self) -> ClusterRole {
        match self {
            ElectionState::Leader => ClusterRole::Leader,
            ElectionState::Follower | ElectionState::ElectionInProgress => ClusterRole::Follower,
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Follower => write!(f, "Follower"),
            ElectionState::ElectionInProgress => write!(f, "ElectionInProgress"),
            ElectionState::Leader => write!(f, "Leader"),
        }
    }
}

/// Read-only view of the election state.
#[derive(Debug, Clone)]
pub struct RoleWatch {
    rx: watch::Receiver<ElectionState>,
}

impl RoleWatch {
    pub(crate) fn new(rx: watch::Receiver<ElectionState>) -> Self {
        Self { rx }
    }

    pub fn state(&self) -> ElectionState {
        *self.rx.borrow()
    }

    pub fn role(&self) -> ClusterRole {
        self.state().role()
    }

    /// Waits for the next state change and returns the new state.
    pub async fn changed(&mut self) -> LeaderResult<ElectionState> {
        self.rx.changed().await.map_err(|_| LeaderError::Internal {
            reason: "election engine dropped".to_string(),
        })?;
        Ok(*self.rx.borrow_and_update())
    }
}

/// Statistics about election activity on this node
#[derive(Debug, Default, Clone, Serialize)]
pub struct ElectionStats {
    pub elections_started: u64,
    pub elections_won: u64,
    pub elections_lost: u64,
    pub demotions: u64,
    pub resignations: u64,
}

/// Runs the election protocol and guards the leader lock.
pub struct ElectionEngine {
    client: Arc<dyn CoordinationClient>,
    identity: NodeIdentity,
    paths: ClusterPaths,
    advertise_address: String,
    poll_fallback: Duration,
    state_tx: watch::Sender<ElectionState>,
    election_lock: Mutex<()>,
    stats: RwLock<ElectionStats>,
    notifications: Arc<LeaderNotificationBus>,
}

impl ElectionEngine {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        identity: NodeIdentity,
        config: &LeaderConfig,
        notifications: Arc<LeaderNotificationBus>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ElectionState::Follower);

        Self {
            client,
            identity,
            paths: config.paths(),
            advertise_address: config.advertise_address.clone(),
            poll_fallback: config.election_poll_fallback,
            state_tx,
            election_lock: Mutex::new(()),
            stats: RwLock::new(ElectionStats::default()),
            notifications,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn paths(&self) -> &ClusterPaths {
        &self.paths
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    pub fn role(&self) -> ClusterRole {
        self.state().role()
    }

    pub fn is_leader(&self) -> bool {
        self.role().is_leader()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> RoleWatch {
        RoleWatch::new(self.state_tx.subscribe())
    }

    pub fn stats(&self) -> ElectionStats {
        self.stats.read().clone()
    }

    /// The record this node writes into the lock when it wins.
    pub fn own_record(&self) -> LeaderRecord {
        LeaderRecord::new(self.identity.name(), self.advertise_address.clone())
    }

    /// Non-blocking existence check on the leader lock.
    pub async fn check_if_leader_exists(&self) -> LeaderResult<bool> {
        self.client
            .exists(&self.paths.leader())
            .await
            .map_err(LeaderError::from_coord)
    }

    /// Current content of the leader lock, `None` when no leader exists.
    pub async fn leader_record(&self) -> LeaderResult<Option<LeaderRecord>> {
        match self.client.get(&self.paths.leader()).await {
            Ok(data) => Ok(Some(LeaderRecord::from_slice(&data)?)),
            Err(e) if e.is_no_node() => Ok(None),
            Err(e) => Err(LeaderError::from_coord(e)),
        }
    }

    /// Elects a leader if none exists.
    ///
    /// Blocks while this node is queued behind other contenders. Returns the
    /// role this node holds once the election settles.
    pub async fn auto_init_leader(&self) -> LeaderResult<ClusterRole> {
        let _guard = self.election_lock.lock().await;

        if self.check_if_leader_exists().await? {
            debug!(node = %self.identity, "Leader lock present, no election needed");
            return Ok(self.role());
        }

        self.publish_state(ElectionState::ElectionInProgress).await;
        self.stats.write().elections_started += 1;
        self.notifications
            .notify_election_started(self.identity.name())
            .await;
        info!(node = %self.identity, "No leader found, entering election");

        let recipe = ElectionRecipe::new(Arc::clone(&self.client), self.paths.election())
            .with_poll_fallback(self.poll_fallback);

        let ticket = match recipe.run(self.identity.name()).await {
            Ok(ticket) => ticket,
            Err(e) => {
                self.publish_state(ElectionState::Follower).await;
                return Err(LeaderError::from_coord(e));
            }
        };

        let outcome = self.elected_callback().await;

        // Releasing lets the next contender observe the lock and settle as Follower.
        if let Err(e) = ticket.release().await {
            if e.is_session_loss() {
                return Err(LeaderError::from_coord(e));
            }
            warn!("Failed to release election candidate: {}", e);
        }

        if self.state() == ElectionState::ElectionInProgress {
            self.publish_state(ElectionState::Follower).await;
        }

        outcome.map(|_| self.role())
    }

    /// Attempts to take the leader lock. Called once this node reaches the
    /// front of the election queue.
    ///
    /// Returns `true` when the lock was created. Losing the creation race is
    /// not an error.
    pub async fn elected_callback(&self) -> LeaderResult<bool> {
        let record = self.own_record();

        match self
            .client
            .create(&self.paths.leader(), record.to_bytes()?, CreateMode::Ephemeral)
            .await
        {
            Ok(_) => {
                self.stats.write().elections_won += 1;
                info!(node = %self.identity, "Acquired leader lock as {}", record);
                self.publish_state(ElectionState::Leader).await;
                self.notifications.notify_leader_elected(record).await;
                Ok(true)
            }
            Err(e) if e.is_node_exists() => {
                self.stats.write().elections_lost += 1;
                let winner = self
                    .leader_record()
                    .await
                    .ok()
                    .flatten()
                    .map(|r| r.hostname);
                debug!(
                    node = %self.identity,
                    "Lost leader lock race to {:?}", winner
                );
                self.publish_state(ElectionState::Follower).await;
                self.notifications
                    .notify_election_lost(self.identity.name(), winner)
                    .await;
                Ok(false)
            }
            Err(e) => {
                self.publish_state(ElectionState::Follower).await;
                Err(LeaderError::from_coord(e))
            }
        }
    }

    /// Drops to Follower without touching the lock.
    pub(crate) async fn mark_follower(&self) {
        self.publish_state(ElectionState::Follower).await;
    }

    /// Steps down because the lock names another owner.
    ///
    /// Returns `true` if this node was Leader before the call.
    pub async fn demote(&self, lock_owner: Option<String>) -> bool {
        if self.state() != ElectionState::Leader {
            return false;
        }

        error!(
            node = %self.identity,
            "Leader lock is owned by {:?}, demoting self to Follower", lock_owner
        );
        self.stats.write().demotions += 1;
        self.publish_state(ElectionState::Follower).await;
        self.notifications
            .notify_leader_demoted(self.identity.name(), lock_owner)
            .await;
        true
    }

    /// Gives up leadership. The lock is deleted only when it names this node.
    pub async fn resign(&self) -> LeaderResult<()> {
        let _guard = self.election_lock.lock().await;

        if self.state() != ElectionState::Leader {
            return Ok(());
        }

        match self.leader_record().await? {
            Some(record) if record.is_owned_by(self.identity.name()) => {
                match self.client.delete(&self.paths.leader()).await {
                    Ok(()) => {}
                    Err(e) if e.is_no_node() => {}
                    Err(e) => return Err(LeaderError::from_coord(e)),
                }
                info!(node = %self.identity, "Resigned leadership");
            }
            other => {
                warn!(
                    node = %self.identity,
                    "Not deleting leader lock owned by {:?}",
                    other.map(|r| r.hostname)
                );
            }
        }

        self.stats.write().resignations += 1;
        self.publish_state(ElectionState::Follower).await;
        self.notifications
            .notify_leader_resigned(self.identity.name())
            .await;
        Ok(())
    }

    async fn publish_state(&self, next: ElectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return;
        }

        debug!(node = %self.identity, "Election state {} -> {}", previous, next);

        let event = RoleTransitionEvent::new(previous.role(), next.role());
        if event.previous_role != event.new_role {
            self.notifications.notify_role_changed(event).await;
        }
    }
}

impl fmt::Debug for ElectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectionEngine")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}
