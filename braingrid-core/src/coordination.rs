//! The coordination-service capability consumed by a BrainGrid node.
//!
//! The election engine and membership registrar never talk to a concrete
//! backend; they hold an `Arc<dyn CoordinationClient>` bound to one session.

use crate::{CoordResult, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

/// Lifetime semantics of a created entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Deleted automatically when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a monotonically increasing 10-digit suffix appended to
    /// the requested name.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        !matches!(self, CreateMode::Persistent)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(self, CreateMode::EphemeralSequential)
    }
}

/// Kind of change observed on a watched entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Created,
    DataChanged,
    Deleted,
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKind::Created => write!(f, "CREATED"),
            WatchKind::DataChanged => write!(f, "DATA_CHANGED"),
            WatchKind::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A change delivered to a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

/// Stream of changes on a watched entry and its direct children.
pub type Watcher = mpsc::UnboundedReceiver<WatchEvent>;

/// Hierarchical key-value store with ephemeral entries, bound to one session.
///
/// Implementations must make `create` a linearizable compare-and-create: of
/// any number of concurrent creates on the same path, exactly one succeeds and
/// the rest fail with [`CoordError::NodeExists`](crate::CoordError::NodeExists).
/// The leader lock relies on this and nothing else for mutual exclusion.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// The session every ephemeral entry created through this client belongs to.
    fn session_id(&self) -> SessionId;

    /// Creates an entry and returns the path actually created (which differs
    /// from `path` for sequential entries). The parent must exist.
    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> CoordResult<String>;

    async fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Reads an entry's value; `NoNode` if it does not exist.
    async fn get(&self, path: &str) -> CoordResult<Bytes>;

    /// Overwrites an entry's value; `NoNode` if it does not exist.
    async fn set(&self, path: &str, data: Bytes) -> CoordResult<()>;

    async fn delete(&self, path: &str) -> CoordResult<()>;

    /// Names (not full paths) of the direct children, sorted.
    async fn children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Creates `path` and any missing ancestors as persistent entries.
    /// Succeeds if they already exist.
    async fn ensure_path(&self, path: &str) -> CoordResult<()>;

    /// Subscribes to changes on `path` and its direct children.
    fn watch(&self, path: &str) -> CoordResult<Watcher>;

    /// Ends the session. Every ephemeral entry it owns is removed.
    async fn close(&self) -> CoordResult<()>;
}

impl fmt::Debug for dyn CoordinationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoordinationClient({})", self.session_id())
    }
}
