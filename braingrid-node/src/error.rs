//! Node process error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Leader error: {0}")]
    Leader(#[from] braingrid_leader::LeaderError),

    #[error("{failed} of {total} nodes stopped with an error")]
    NodesFailed { failed: usize, total: usize },
}
