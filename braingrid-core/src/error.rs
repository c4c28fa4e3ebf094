//! # Error Types
//!
//! Errors surfaced by a coordination service session.

use crate::SessionId;
use thiserror::Error;

/// Error types returned by [`CoordinationClient`](crate::CoordinationClient)
/// operations.
///
/// The variants fall into three groups that callers treat differently:
///
/// - **Outcome errors** (`NoNode`, `NodeExists`, `NotEmpty`): expected results
///   of racing against other nodes, usually converted into a decision
/// - **Transient errors** (`ConnectionLoss`): the ensemble was briefly
///   unreachable; retry on the next iteration
/// - **Fatal errors** (`ConnectionClosed`): the session is gone together with
///   every ephemeral entry it owned; the process must restart with a fresh one
///
/// # Examples
///
/// ```rust
/// use braingrid_core::CoordError;
///
/// let error = CoordError::connection_loss("timed out");
/// if error.is_retryable() {
///     println!("try again next poll");
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// The entry does not exist
    #[error("No node at {path}")]
    NoNode { path: String },

    /// The entry already exists; the compare-and-create lost
    #[error("Node already exists at {path}")]
    NodeExists { path: String },

    /// The entry cannot be deleted while it has children
    #[error("Node {path} is not empty")]
    NotEmpty { path: String },

    /// The path is not a valid absolute coordination path
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    /// The ensemble could not be reached; the session may still be alive
    #[error("Connection lost: {message}")]
    ConnectionLoss { message: String },

    /// The session has ended and cannot be resumed
    #[error("Connection closed for session {session}")]
    ConnectionClosed { session: SessionId },

    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

/// Type alias for Results returned by coordination operations.
pub type CoordResult<T> = std::result::Result<T, CoordError>;

impl CoordError {
    /// Creates a transient connection-loss error with the given message.
    pub fn connection_loss(message: impl Into<String>) -> Self {
        Self::ConnectionLoss {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns `true` if the operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLoss { .. })
    }

    /// Returns `true` if the session has ended.
    ///
    /// Session loss is never retried in place: every ephemeral entry owned by
    /// the session is already gone, so the node restarts and re-registers.
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }

    /// Returns `true` for the "entry already exists" outcome.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists { .. })
    }

    /// Returns `true` for the "entry does not exist" outcome.
    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode { .. })
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
