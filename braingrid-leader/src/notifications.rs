//! In-process events about the leader lock and cluster membership.

use crate::LeaderResult;
use braingrid_core::{LeaderRecord, RoleTransitionEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Events about the leader lock, as seen by one node
#[derive(Debug, Clone)]
pub enum LeadershipChange {
    /// This node entered the election queue
    ElectionStarted { hostname: String, timestamp: u64 },

    /// This node created the leader lock
    LeaderElected { record: LeaderRecord, timestamp: u64 },

    /// This node reached the front of the queue but another node holds the lock
    ElectionLost {
        hostname: String,
        winner: Option<String>,
        timestamp: u64,
    },

    /// The watchdog found no leader lock
    LeaderTimeout { observed_by: String, timestamp: u64 },

    /// This node believed it was leader but the lock names someone else
    LeaderDemoted {
        hostname: String,
        lock_owner: Option<String>,
        timestamp: u64,
    },

    /// This node gave up leadership on shutdown
    LeaderResigned { hostname: String, timestamp: u64 },

    /// The node's role changed
    RoleChanged {
        event: RoleTransitionEvent,
        timestamp: u64,
    },
}

/// Presence changes under the nodes path
#[derive(Debug, Clone)]
pub enum TopologyChange {
    /// A presence entry appeared
    NodeJoined { hostname: String, timestamp: u64 },

    /// A presence entry disappeared
    NodeLeft { hostname: String, timestamp: u64 },

    /// This node's own presence entry was missing and has been re-created
    PresenceRestored { hostname: String, timestamp: u64 },
}

#[derive(Debug, Clone)]
pub enum LeaderNotification {
    Leadership(LeadershipChange),
    Topology(TopologyChange),
}

/// Which notifications a subscriber receives
#[derive(Clone)]
pub enum NotificationFilter {
    All,
    Leadership,
    Topology,

    /// Events whose subject is this host
    Host(String),

    /// Arbitrary predicate
    Custom(Arc<dyn Fn(&LeaderNotification) -> bool + Send + Sync>),
}

impl LeaderNotification {
    /// Host the notification is about, if any.
    pub fn hostname(&self) -> Option<&str> {
        let host = match self {
            LeaderNotification::Leadership(change) => match change {
                LeadershipChange::ElectionStarted { hostname, .. }
                | LeadershipChange::ElectionLost { hostname, .. }
                | LeadershipChange::LeaderDemoted { hostname, .. }
                | LeadershipChange::LeaderResigned { hostname, .. } => hostname,
                LeadershipChange::LeaderElected { record, .. } => &record.hostname,
                LeadershipChange::LeaderTimeout { observed_by, .. } => observed_by,
                LeadershipChange::RoleChanged { .. } => return None,
            },
            LeaderNotification::Topology(change) => match change {
                TopologyChange::NodeJoined { hostname, .. }
                | TopologyChange::NodeLeft { hostname, .. }
                | TopologyChange::PresenceRestored { hostname, .. } => hostname,
            },
        };
        Some(host.as_str())
    }
}

impl NotificationFilter {
    pub fn matches(&self, notification: &LeaderNotification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Leadership => {
                matches!(notification, LeaderNotification::Leadership(_))
            }
            NotificationFilter::Topology => matches!(notification, LeaderNotification::Topology(_)),
            NotificationFilter::Host(host) => notification.hostname() == Some(host.as_str()),
            NotificationFilter::Custom(predicate) => predicate(notification),
        }
    }
}

pub type SubscriptionId = Uuid;

/// Delivery counters
#[derive(Debug, Default, Clone)]
pub struct NotificationStats {
    pub published: u64,
    pub delivered: u64,
    /// Subscribers found closed and removed
    pub pruned: u64,
    pub active_subscriptions: usize,
    pub total_subscriptions: u64,
}

struct Subscriber {
    filter: NotificationFilter,
    sender: mpsc::UnboundedSender<LeaderNotification>,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    stats: NotificationStats,
}

/// Fans leadership and topology events out to in-process subscribers.
///
/// Each node owns one bus. Subscribers whose receiver was dropped are
/// removed on the next publish.
#[derive(Default)]
pub struct LeaderNotificationBus {
    registry: RwLock<Registry>,
}

impl LeaderNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> LeaderResult<(SubscriptionId, mpsc::UnboundedReceiver<LeaderNotification>)> {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut registry = self.registry.write().await;
        registry.subscribers.insert(id, Subscriber { filter, sender });
        registry.stats.total_subscriptions += 1;
        registry.stats.active_subscriptions = registry.subscribers.len();
        debug!("Subscription {} registered", id);

        Ok((id, receiver))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> LeaderResult<()> {
        let mut registry = self.registry.write().await;
        if registry.subscribers.remove(&id).is_some() {
            registry.stats.active_subscriptions = registry.subscribers.len();
            debug!("Subscription {} removed", id);
        }
        Ok(())
    }

    /// Delivers `notification` to every subscriber whose filter matches.
    pub async fn publish(&self, notification: LeaderNotification) {
        let mut registry = self.registry.write().await;
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, subscriber) in &registry.subscribers {
            if !subscriber.filter.matches(&notification) {
                continue;
            }
            if subscriber.sender.send(notification.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }

        for id in &closed {
            registry.subscribers.remove(id);
        }
        if !closed.is_empty() {
            warn!("Pruned {} closed notification subscribers", closed.len());
        }

        let active = registry.subscribers.len();
        let stats = &mut registry.stats;
        stats.published += 1;
        stats.delivered += delivered;
        stats.pruned += closed.len() as u64;
        stats.active_subscriptions = active;
    }

    async fn leadership(&self, change: LeadershipChange) {
        self.publish(LeaderNotification::Leadership(change)).await;
    }

    async fn topology(&self, change: TopologyChange) {
        self.publish(LeaderNotification::Topology(change)).await;
    }

    pub async fn notify_election_started(&self, hostname: &str) {
        self.leadership(LeadershipChange::ElectionStarted {
            hostname: hostname.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_leader_elected(&self, record: LeaderRecord) {
        self.leadership(LeadershipChange::LeaderElected {
            record,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_election_lost(&self, hostname: &str, winner: Option<String>) {
        self.leadership(LeadershipChange::ElectionLost {
            hostname: hostname.to_string(),
            winner,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_leader_timeout(&self, observed_by: &str) {
        self.leadership(LeadershipChange::LeaderTimeout {
            observed_by: observed_by.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_leader_demoted(&self, hostname: &str, lock_owner: Option<String>) {
        self.leadership(LeadershipChange::LeaderDemoted {
            hostname: hostname.to_string(),
            lock_owner,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_leader_resigned(&self, hostname: &str) {
        self.leadership(LeadershipChange::LeaderResigned {
            hostname: hostname.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_role_changed(&self, event: RoleTransitionEvent) {
        self.leadership(LeadershipChange::RoleChanged {
            event,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_node_joined(&self, hostname: &str) {
        self.topology(TopologyChange::NodeJoined {
            hostname: hostname.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_node_left(&self, hostname: &str) {
        self.topology(TopologyChange::NodeLeft {
            hostname: hostname.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_presence_restored(&self, hostname: &str) {
        self.topology(TopologyChange::PresenceRestored {
            hostname: hostname.to_string(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn get_stats(&self) -> NotificationStats {
        self.registry.read().await.stats.clone()
    }

    pub async fn subscription_count(&self) -> usize {
        self.registry.read().await.subscribers.len()
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

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = LeaderNotificationBus::new();

        let (id, _rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        assert_eq!(bus.subscription_count().await, 1);

        bus.unsubscribe(id).await.unwrap();
        assert_eq!(bus.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_filtered_subscriptions() {
        let bus = LeaderNotificationBus::new();

        let (_id1, mut leadership) = bus.subscribe(NotificationFilter::Leadership).await.unwrap();
        let (_id2, mut topology) = bus.subscribe(NotificationFilter::Topology).await.unwrap();

        bus.notify_leader_elected(LeaderRecord::new("a", "10.0.0.1"))
            .await;

        assert!(matches!(
            leadership.try_recv(),
            Ok(LeaderNotification::Leadership(LeadershipChange::LeaderElected { .. }))
        ));
        assert!(topology.try_recv().is_err());

        bus.notify_node_joined("b").await;
        assert!(matches!(
            topology.try_recv(),
            Ok(LeaderNotification::Topology(TopologyChange::NodeJoined { .. }))
        ));
    }

    #[tokio::test]
    async fn test_host_filter() {
        let bus = LeaderNotificationBus::new();
        let (_id, mut rx) = bus
            .subscribe(NotificationFilter::Host("b".to_string()))
            .await
            .unwrap();

        bus.notify_node_left("a").await;
        bus.notify_node_left("b").await;

        match rx.try_recv() {
            Ok(LeaderNotification::Topology(TopologyChange::NodeLeft { hostname, .. })) => {
                assert_eq!(hostname, "b")
            }
            other => panic!("unexpected notification: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.get_stats().await.published, 2);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let bus = LeaderNotificationBus::new();
        let (_kept, _rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        let (_gone, rx) = bus.subscribe(NotificationFilter::All).await.unwrap();
        drop(rx);

        bus.notify_leader_resigned("a").await;

        let stats = bus.get_stats().await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.pruned, 1);
        assert_eq!(bus.subscription_count().await, 1);
    }
}
