//! Error types for leader management operations.

use braingrid_core::{CoordError, SessionId};
use thiserror::Error;

/// Result type for leader management operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur during leader management operations
#[derive(Error, Debug)]
pub enum LeaderError {
    /// Coordination service call failed
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordError),

    /// The coordination session ended; the process must restart
    #[error("Coordination session {session} lost")]
    SessionLost { session: SessionId },

    /// Leadership election failed
    #[error("Leadership election failed: {reason}")]
    ElectionFailed { reason: String },

    /// A dependent subsystem failed a lifecycle call
    #[error("Dependent {dependent} failed {phase}: {reason}")]
    TransitionFailed {
        dependent: String,
        phase: String,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    /// Internal system error
    #[error("Internal system error: {reason}")]
    Internal { reason: String },
}

impl LeaderError {
    /// Whether the error must bring the node down.
    pub fn is_fatal(&self) -> bool {
        match self {
            LeaderError::SessionLost { .. } => true,
            LeaderError::Coordination(e) => e.is_session_loss(),
            LeaderError::TransitionFailed { .. } => true,
            _ => false,
        }
    }

    /// Converts a coordination error, promoting session loss to `SessionLost`.
    pub fn from_coord(err: CoordError) -> Self {
        match err {
            CoordError::ConnectionClosed { session } => LeaderError::SessionLost { session },
            other => LeaderError::Coordination(other),
        }
    }
}

impl From<anyhow::Error> for LeaderError {
    fn from(err: anyhow::Error) -> Self {
        LeaderError::Internal {
            reason: err.to_string(),
        }
    }
}
