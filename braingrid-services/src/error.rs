//! Error types for BrainGrid subsystems.

use braingrid_core::CoordError;
use braingrid_leader::LeaderError;
use thiserror::Error;

/// Result type for subsystem operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by subsystems and the CLI
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A command line did not follow `Root.Subcommand key value ...`
    #[error("Cannot parse command {input:?}: {reason}")]
    Parse { input: String, reason: String },

    /// No handler is registered for the command root
    #[error("Unknown command root: {root}")]
    UnknownRoot { root: String },

    /// The handler does not know the subcommand
    #[error("Unknown command: {root}.{command}")]
    UnknownCommand { root: String, command: String },

    /// A required argument was not supplied
    #[error("Missing argument: {name}")]
    MissingArgument { name: String },

    /// No response arrived in time
    #[error("Timed out waiting for response on {connection}")]
    Timeout { connection: String },

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordError),

    #[error("Leader error: {0}")]
    Leader(#[from] LeaderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stats source or log store failure
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is the caller's fault rather than the system's.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Parse { .. }
                | ServiceError::UnknownRoot { .. }
                | ServiceError::UnknownCommand { .. }
                | ServiceError::MissingArgument { .. }
        )
    }
}
