//! Faults that can be injected into a running harness.

use crate::cluster::ClusterHarness;
use braingrid_core::{CoordinationClient, CreateMode, LeaderRecord};
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

#[derive(Debug, Clone)]
pub enum FaultType {
    /// End a node's session as if its process crashed
    KillSession { node: String },

    /// Kill whichever node currently holds the leader lock
    KillLeader,

    /// Kill a random running node that is not the leader
    KillRandomFollower,

    /// Delete the leader lock out from under its owner
    DeleteLeaderLock,

    /// Rewrite the lock so it names another host
    OverwriteLeaderLock { hostname: String },

    /// Delete a node's presence entry while its session stays alive
    DeletePresence { node: String },

    /// Make the whole ensemble unreachable for a while
    Outage { duration: Duration },
}

/// What an injected fault touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultOutcome {
    Applied,
    Killed { node: String, entries_removed: usize },
    NotApplicable { reason: String },
}

impl ClusterHarness {
    pub async fn inject(&self, fault: FaultType) -> FaultOutcome {
        info!("Injecting fault: {:?}", fault);

        match fault {
            FaultType::KillSession { node } => self.kill(&node),

            FaultType::KillLeader => match self.leader_record() {
                Some(record) => self.kill(&record.hostname),
                None => FaultOutcome::NotApplicable {
                    reason: "no leader lock".to_string(),
                },
            },

            FaultType::KillRandomFollower => {
                let leader = self.leader_record().map(|r| r.hostname);
                let candidate = self
                    .names()
                    .into_iter()
                    .filter(|name| Some(name) != leader.as_ref())
                    .filter(|name| self.node(name).map(|n| n.is_running()).unwrap_or(false))
                    .choose(&mut rand::thread_rng());
                match candidate {
                    Some(name) => self.kill(&name),
                    None => FaultOutcome::NotApplicable {
                        reason: "no running follower".to_string(),
                    },
                }
            }

            FaultType::DeleteLeaderLock => {
                let path = self.paths().leader();
                match self.admin().delete(&path).await {
                    Ok(()) => FaultOutcome::Applied,
                    Err(e) => FaultOutcome::NotApplicable {
                        reason: e.to_string(),
                    },
                }
            }

            FaultType::OverwriteLeaderLock { hostname } => {
                let path = self.paths().leader();
                let record = LeaderRecord::new(hostname, "192.0.2.1");
                let data = match record.to_bytes() {
                    Ok(data) => data,
                    Err(e) => {
                        return FaultOutcome::NotApplicable {
                            reason: e.to_string(),
                        }
                    }
                };
                match self.admin().set(&path, data).await {
                    Ok(()) => FaultOutcome::Applied,
                    Err(e) => FaultOutcome::NotApplicable {
                        reason: e.to_string(),
                    },
                }
            }

            FaultType::DeletePresence { node } => {
                let path = self.paths().node(&node);
                match self.admin().delete(&path).await {
                    Ok(()) => FaultOutcome::Applied,
                    Err(e) => FaultOutcome::NotApplicable {
                        reason: e.to_string(),
                    },
                }
            }

            FaultType::Outage { duration } => {
                self.ensemble().set_available(false);
                sleep(duration).await;
                self.ensemble().set_available(true);
                FaultOutcome::Applied
            }
        }
    }

    /// Creates an ephemeral entry owned by the admin session, e.g. a rogue
    /// leader lock.
    pub async fn plant(&self, path: &str, data: Bytes) -> bool {
        self.admin()
            .create(path, data, CreateMode::Ephemeral)
            .await
            .is_ok()
    }

    fn kill(&self, name: &str) -> FaultOutcome {
        let Some(node) = self.node(name) else {
            return FaultOutcome::NotApplicable {
                reason: format!("unknown node {}", name),
            };
        };
        let entries_removed = self.ensemble().expire_session(node.session.id());
        FaultOutcome::Killed {
            node: name.to_string(),
            entries_removed,
        }
    }
}
