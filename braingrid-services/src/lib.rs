//! # BrainGrid Services
//!
//! Subsystems whose lifecycle follows the node's cluster role. Each one
//! implements [`Dependent`](braingrid_leader::Dependent) and is driven by the
//! role transition manager:
//!
//! | subsystem | every node | leader only |
//! |---|---|---|
//! | [`TelemetryManager`] | publishes its own [`SystemStats`] | aggregates a [`ClusterSnapshot`] |
//! | [`LogRetentionManager`] | idle | purges aged records from a [`LogStore`] |
//! | [`CliServer`] | idle | answers CLI mailboxes |

pub mod cli;
mod daemon;
pub mod error;
pub mod retention;
pub mod telemetry;

pub use cli::{
    BgCommands, CliClient, CliResponse, CliServer, CliServerConfig, Command, CommandHandler,
    CommandRegistry,
};
pub use error::{ServiceError, ServiceResult};
pub use retention::{LogRecord, LogRetentionManager, LogStore, MemoryLogStore, RetentionConfig};
pub use telemetry::{
    ClusterSnapshot, StatsSource, SysinfoSource, SystemStats, TelemetryConfig, TelemetryManager,
};
