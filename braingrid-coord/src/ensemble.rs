//! # Ensemble Implementation
//!
//! An in-process coordination ensemble: a hierarchical tree of entries with
//! session-owned ephemeral entries, sequential names and change watches.
//! All sessions of one `Ensemble` observe a single linearizable history.

use crate::notifications::{NotificationBus, WatchFilter};
use crate::session::EnsembleSession;
use braingrid_core::paths::{self, parent};
use braingrid_core::{CoordError, CoordResult, CreateMode, SessionId, WatchEvent, WatchKind, Watcher};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Configuration for the Ensemble
#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Maximum number of entries in the tree
    pub max_nodes: usize,
    /// Maximum value size in bytes
    pub max_value_size: usize,
    /// Artificial delay applied to every session operation
    pub op_latency: Duration,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_nodes: 100_000,
            max_value_size: 1024 * 1024, // 1MB
            op_latency: Duration::ZERO,
        }
    }
}

impl EnsembleConfig {
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }
}

/// One entry in the tree
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub data: Bytes,
    pub version: u64,
    pub ephemeral_owner: Option<SessionId>,
    pub created_at: u64,
    pub modified_at: u64,
}

impl TreeEntry {
    fn new(data: Bytes, ephemeral_owner: Option<SessionId>) -> Self {
        let now = now_millis();
        Self {
            data,
            version: 0,
            ephemeral_owner,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Ensemble statistics
#[derive(Debug, Clone, Default)]
pub struct EnsembleStats {
    pub total_operations: u64,
    pub creates: u64,
    pub create_conflicts: u64,
    pub deletes: u64,
    pub sessions_opened: u64,
    pub sessions_expired: u64,
}

#[derive(Debug, Clone)]
struct SessionState {
    opened_at: u64,
    closed: bool,
}

/// In-process coordination ensemble
pub struct Ensemble {
    config: EnsembleConfig,
    nodes: DashMap<String, TreeEntry>,
    sequences: DashMap<String, u64>,
    sessions: DashMap<SessionId, SessionState>,
    next_session: AtomicU64,
    available: AtomicBool,
    bus: NotificationBus,
    stats: RwLock<EnsembleStats>,
}

impl Ensemble {
    /// Create a new ensemble holding only the root entry
    pub fn new(config: EnsembleConfig) -> Arc<Self> {
        let nodes = DashMap::new();
        nodes.insert("/".to_string(), TreeEntry::new(Bytes::new(), None));

        info!("Ensemble initialized with config: {:?}", config);

        Arc::new(Self {
            config,
            nodes,
            sequences: DashMap::new(),
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            available: AtomicBool::new(true),
            bus: NotificationBus::new(),
            stats: RwLock::new(EnsembleStats::default()),
        })
    }

    /// Open a new session
    pub fn connect(self: &Arc<Self>) -> EnsembleSession {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::AcqRel));
        self.sessions.insert(
            id,
            SessionState {
                opened_at: now_millis(),
                closed: false,
            },
        );
        self.stats.write().sessions_opened += 1;

        debug!("Session {} opened", id);
        EnsembleSession::new(Arc::clone(self), id)
    }

    /// End a session as if its client crashed: every ephemeral entry it owns
    /// is deleted and all later calls through it fail with `ConnectionClosed`.
    /// Returns the number of ephemeral entries removed.
    pub fn expire_session(&self, session: SessionId) -> usize {
        match self.sessions.get_mut(&session) {
            Some(mut state) if !state.closed => state.closed = true,
            _ => return 0,
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().ephemeral_owner == Some(session))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for path in owned {
            if self.nodes.remove(&path).is_some() {
                removed += 1;
                self.publish(&path, WatchKind::Deleted);
            }
        }

        self.stats.write().sessions_expired += 1;
        info!("Session {} expired, removed {} ephemeral entries", session, removed);
        removed
    }

    /// Toggle ensemble reachability. While unavailable every session call
    /// fails with the transient `ConnectionLoss`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
        if available {
            info!("Ensemble reachable again");
        } else {
            warn!("Ensemble marked unreachable");
        }
    }

    pub fn is_session_alive(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .map(|state| !state.closed)
            .unwrap_or(false)
    }

    /// Sessions that are still open, oldest first
    pub fn live_sessions(&self) -> Vec<SessionId> {
        let mut live: Vec<(u64, SessionId)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().closed)
            .map(|entry| (entry.value().opened_at, *entry.key()))
            .collect();
        live.sort();
        live.into_iter().map(|(_, id)| id).collect()
    }

    /// Read an entry without going through a session
    pub fn entry(&self, path: &str) -> Option<TreeEntry> {
        self.nodes.get(path).map(|entry| entry.value().clone())
    }

    /// Copy of the whole tree, ordered by path
    pub fn snapshot(&self) -> BTreeMap<String, TreeEntry> {
        self.nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn stats(&self) -> EnsembleStats {
        self.stats.read().clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    // Session operations

    pub(crate) async fn simulate_latency(&self) {
        if !self.config.op_latency.is_zero() {
            tokio::time::sleep(self.config.op_latency).await;
        }
    }

    pub(crate) fn check_session(&self, session: SessionId) -> CoordResult<()> {
        if !self.is_session_alive(session) {
            return Err(CoordError::ConnectionClosed { session });
        }
        if !self.available.load(Ordering::Acquire) {
            return Err(CoordError::connection_loss("ensemble unreachable"));
        }
        self.stats.write().total_operations += 1;
        Ok(())
    }

    pub(crate) fn create(
        &self,
        session: SessionId,
        path: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> CoordResult<String> {
        self.check_session(session)?;
        paths::validate(path)?;
        self.validate_value(&data)?;

        let parent_path = parent(path).ok_or_else(|| CoordError::NodeExists {
            path: path.to_string(),
        })?;
        if !self.nodes.contains_key(parent_path) {
            return Err(CoordError::NoNode {
                path: parent_path.to_string(),
            });
        }
        if self.nodes.len() >= self.config.max_nodes {
            return Err(CoordError::connection_loss("ensemble is full"));
        }

        let actual_path = if mode.is_sequential() {
            let seq = {
                let mut counter = self.sequences.entry(parent_path.to_string()).or_insert(0);
                *counter += 1;
                *counter
            };
            format!("{}{:010}", path, seq)
        } else {
            path.to_string()
        };

        let owner = mode.is_ephemeral().then_some(session);

        // The entry API holds the shard lock across check and insert, which
        // makes this a linearizable compare-and-create.
        match self.nodes.entry(actual_path.clone()) {
            Entry::Occupied(_) => {
                self.stats.write().create_conflicts += 1;
                debug!("CREATE conflict: path={}, session={}", actual_path, session);
                return Err(CoordError::NodeExists { path: actual_path });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TreeEntry::new(data, owner));
            }
        }

        self.stats.write().creates += 1;
        self.publish(&actual_path, WatchKind::Created);

        debug!("CREATE: path={}, mode={:?}, session={}", actual_path, mode, session);
        Ok(actual_path)
    }

    pub(crate) fn exists(&self, session: SessionId, path: &str) -> CoordResult<bool> {
        self.check_session(session)?;
        paths::validate(path)?;
        Ok(self.nodes.contains_key(path))
    }

    pub(crate) fn get(&self, session: SessionId, path: &str) -> CoordResult<Bytes> {
        self.check_session(session)?;
        paths::validate(path)?;
        self.nodes
            .get(path)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| CoordError::NoNode {
                path: path.to_string(),
            })
    }

    pub(crate) fn set(&self, session: SessionId, path: &str, data: Bytes) -> CoordResult<()> {
        self.check_session(session)?;
        paths::validate(path)?;
        self.validate_value(&data)?;

        {
            let mut entry = self.nodes.get_mut(path).ok_or_else(|| CoordError::NoNode {
                path: path.to_string(),
            })?;
            entry.data = data;
            entry.version += 1;
            entry.modified_at = now_millis();
        }

        self.publish(path, WatchKind::DataChanged);
        Ok(())
    }

    pub(crate) fn delete(&self, session: SessionId, path: &str) -> CoordResult<()> {
        self.check_session(session)?;
        paths::validate(path)?;

        if path == "/" {
            return Err(CoordError::NotEmpty {
                path: path.to_string(),
            });
        }
        if self.has_children(path) {
            return Err(CoordError::NotEmpty {
                path: path.to_string(),
            });
        }
        if self.nodes.remove(path).is_none() {
            return Err(CoordError::NoNode {
                path: path.to_string(),
            });
        }

        self.stats.write().deletes += 1;
        self.publish(path, WatchKind::Deleted);
        Ok(())
    }

    pub(crate) fn children(&self, session: SessionId, path: &str) -> CoordResult<Vec<String>> {
        self.check_session(session)?;
        paths::validate(path)?;

        if !self.nodes.contains_key(path) {
            return Err(CoordError::NoNode {
                path: path.to_string(),
            });
        }

        let mut names: Vec<String> = self
            .nodes
            .iter()
            .filter(|entry| parent(entry.key()) == Some(path))
            .map(|entry| paths::basename(entry.key()).to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub(crate) fn ensure_path(&self, session: SessionId, path: &str) -> CoordResult<()> {
        self.check_session(session)?;
        paths::validate(path)?;

        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            match self.create(session, &current, Bytes::new(), CreateMode::Persistent) {
                Ok(_) => {}
                Err(e) if e.is_node_exists() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub(crate) fn watch(&self, session: SessionId, path: &str) -> CoordResult<Watcher> {
        self.check_session(session)?;
        paths::validate(path)?;
        let (_id, watcher) = self
            .bus
            .subscribe(WatchFilter::PathOrChildren(path.to_string()));
        Ok(watcher)
    }

    // Private helper methods

    fn has_children(&self, path: &str) -> bool {
        self.nodes
            .iter()
            .any(|entry| parent(entry.key()) == Some(path))
    }

    fn validate_value(&self, data: &Bytes) -> CoordResult<()> {
        if data.len() > self.config.max_value_size {
            return Err(CoordError::serialization(format!(
                "value of {} bytes exceeds limit of {}",
                data.len(),
                self.config.max_value_size
            )));
        }
        Ok(())
    }

    fn publish(&self, path: &str, kind: WatchKind) {
        self.bus.publish(WatchEvent {
            path: path.to_string(),
            kind,
        });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_parent() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let session = ensemble.connect();
        let id = session.id();

        let result = ensemble.create(id, "/a/b", Bytes::new(), CreateMode::Persistent);
        assert!(matches!(result, Err(CoordError::NoNode { .. })));

        ensemble.ensure_path(id, "/a").unwrap();
        assert!(ensemble
            .create(id, "/a/b", Bytes::new(), CreateMode::Persistent)
            .is_ok());
    }

    #[test]
    fn test_compare_and_create() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let first = ensemble.connect().id();
        let second = ensemble.connect().id();

        assert!(ensemble
            .create(first, "/lock", Bytes::from("a"), CreateMode::Ephemeral)
            .is_ok());
        let result = ensemble.create(second, "/lock", Bytes::from("b"), CreateMode::Ephemeral);
        assert!(matches!(result, Err(CoordError::NodeExists { .. })));

        assert_eq!(ensemble.entry("/lock").unwrap().data, Bytes::from("a"));
        assert_eq!(ensemble.stats().create_conflicts, 1);
    }

    #[test]
    fn test_sequential_names() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let id = ensemble.connect().id();
        ensemble.ensure_path(id, "/e").unwrap();

        let first = ensemble
            .create(id, "/e/n_", Bytes::new(), CreateMode::EphemeralSequential)
            .unwrap();
        let second = ensemble
            .create(id, "/e/n_", Bytes::new(), CreateMode::EphemeralSequential)
            .unwrap();

        assert_eq!(first, "/e/n_0000000001");
        assert_eq!(second, "/e/n_0000000002");
    }

    #[test]
    fn test_expiry_removes_only_owned_ephemerals() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let a = ensemble.connect().id();
        let b = ensemble.connect().id();
        ensemble.ensure_path(a, "/n").unwrap();

        ensemble.create(a, "/n/a", Bytes::new(), CreateMode::Ephemeral).unwrap();
        ensemble.create(b, "/n/b", Bytes::new(), CreateMode::Ephemeral).unwrap();

        assert_eq!(ensemble.expire_session(a), 1);
        assert!(ensemble.entry("/n/a").is_none());
        assert!(ensemble.entry("/n/b").is_some());
        assert!(ensemble.entry("/n").is_some());

        let result = ensemble.exists(a, "/n");
        assert!(matches!(result, Err(CoordError::ConnectionClosed { .. })));
        assert_eq!(ensemble.live_sessions(), vec![b]);
    }

    #[test]
    fn test_unavailable_is_transient() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let id = ensemble.connect().id();

        ensemble.set_available(false);
        let err = ensemble.exists(id, "/").unwrap_err();
        assert!(err.is_retryable());

        ensemble.set_available(true);
        assert!(ensemble.exists(id, "/").unwrap());
    }

    #[test]
    fn test_delete_rejects_non_empty() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let id = ensemble.connect().id();
        ensemble.ensure_path(id, "/p/c").unwrap();

        let result = ensemble.delete(id, "/p");
        assert!(matches!(result, Err(CoordError::NotEmpty { .. })));

        ensemble.delete(id, "/p/c").unwrap();
        ensemble.delete(id, "/p").unwrap();
        assert!(matches!(
            ensemble.delete(id, "/p"),
            Err(CoordError::NoNode { .. })
        ));
    }
}
