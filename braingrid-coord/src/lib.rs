//! # BrainGrid Coord
//!
//! An in-process coordination ensemble implementing
//! [`CoordinationClient`](braingrid_core::CoordinationClient).
//!
//! ## Features
//!
//! - **Sessions**: each [`EnsembleSession`] owns the ephemeral entries it creates
//! - **Linearizable create**: concurrent creates on one path have exactly one winner
//! - **Sequential entries**: 10-digit, per-parent monotonically increasing suffixes
//! - **Watches**: change events on an entry and its direct children
//! - **Fault injection**: session expiry and whole-ensemble outages
//!
//! It backs the local node binary and every multi-node test in the workspace.

pub mod ensemble;
pub mod notifications;
pub mod session;

pub use ensemble::{Ensemble, EnsembleConfig, EnsembleStats, TreeEntry};
pub use notifications::{NotificationBus, NotificationStats, SubscriptionId, WatchFilter};
pub use session::EnsembleSession;

#[cfg(test)]
mod tests {
    use super::*;
    use braingrid_core::{CoordinationClient, CreateMode};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_ephemeral_lifecycle() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let session = ensemble.connect();

        session.ensure_path("/root").await.unwrap();
        session
            .create("/root/lock", Bytes::from("me"), CreateMode::Ephemeral)
            .await
            .unwrap();
        assert!(ensemble.entry("/root/lock").is_some());

        ensemble.expire_session(session.id());
        assert!(ensemble.entry("/root/lock").is_none());
        assert!(ensemble.entry("/root").is_some());
    }
}
