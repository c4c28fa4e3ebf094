//! # BrainGrid Testing
//!
//! Multi-node harness, fault injection and recording dependents for testing
//! leader management against the in-process ensemble.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use braingrid_testing::{ClusterHarness, FaultType, HarnessConfig};
//!
//! # async fn example() {
//! let mut harness = ClusterHarness::new(HarnessConfig::default());
//! harness.start_nodes(&["a", "b", "c"]).unwrap();
//!
//! let leader = harness.wait_for_leader(Duration::from_secs(2)).await.unwrap();
//! harness.inject(FaultType::KillLeader).await;
//! let next = harness.wait_for_new_leader(&leader, Duration::from_secs(2)).await;
//! assert!(next.is_some());
//! harness.shutdown().await;
//! # }
//! ```

pub mod cluster;
pub mod fault_injection;
pub mod recording;

pub use cluster::{wait_until, ClusterHarness, HarnessConfig, HarnessNode};
pub use fault_injection::{FaultOutcome, FaultType};
pub use recording::{Behaviour, CallLog, DependentCall, Phase, RecordingDependent};

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}
