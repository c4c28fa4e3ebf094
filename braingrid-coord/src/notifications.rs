//! # Watch Notification System
//!
//! Delivers ensemble changes to watchers using a message bus pattern.

use braingrid_core::paths::parent;
use braingrid_core::{WatchEvent, WatchKind, Watcher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter deciding which events a watcher receives
#[derive(Debug, Clone)]
pub enum WatchFilter {
    /// Every event in the ensemble
    All,
    /// Events on exactly this path
    Path(String),
    /// Events on direct children of this path
    Children(String),
    /// Events on this path or any of its direct children
    PathOrChildren(String),
    /// Only events of one kind, on top of another filter
    Kind(WatchKind, Box<WatchFilter>),
}

impl WatchFilter {
    /// Check if an event matches this filter
    pub fn matches(&self, event: &WatchEvent) -> bool {
        match self {
            WatchFilter::All => true,
            WatchFilter::Path(path) => event.path == *path,
            WatchFilter::Children(path) => parent(&event.path) == Some(path.as_str()),
            WatchFilter::PathOrChildren(path) => {
                event.path == *path || parent(&event.path) == Some(path.as_str())
            }
            WatchFilter::Kind(kind, inner) => event.kind == *kind && inner.matches(event),
        }
    }
}

/// Statistics about the notification bus
#[derive(Debug, Clone, Default)]
pub struct NotificationStats {
    pub total_events_published: u64,
    pub total_subscribers: usize,
    pub dropped_events: u64,
}

type SubscriberMap = HashMap<SubscriptionId, (WatchFilter, mpsc::UnboundedSender<WatchEvent>)>;

/// Message bus distributing ensemble changes to watchers
pub struct NotificationBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    stats: Arc<RwLock<NotificationStats>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Subscribe to events with a filter
    pub fn subscribe(&self, filter: WatchFilter) -> (SubscriptionId, Watcher) {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        debug!("New watch subscription {:?} with filter {:?}", id, filter);
        self.subscribers.write().insert(id, (filter, tx));

        (id, rx)
    }

    pub fn unsubscribe(&self, subscription_id: SubscriptionId) {
        if self.subscribers.write().remove(&subscription_id).is_some() {
            debug!("Watch subscription removed: {:?}", subscription_id);
        }
    }

    /// Publish an event to every matching watcher. Watchers whose receiver
    /// has been dropped are pruned.
    pub fn publish(&self, event: WatchEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, (filter, sender)) in subscribers.iter() {
                if filter.matches(&event) && sender.send(event.clone()).is_err() {
                    closed.push(*id);
                }
            }
        }

        {
            let mut stats = self.stats.write();
            stats.total_events_published += 1;
            stats.dropped_events += closed.len() as u64;
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in &closed {
                subscribers.remove(id);
            }
            debug!("Pruned {} closed watchers", closed.len());
        }

        debug!("Published watch event: path={}, kind={}", event.path, event.kind);
    }

    pub fn stats(&self) -> NotificationStats {
        let mut stats = self.stats.read().clone();
        stats.total_subscribers = self.subscribers.read().len();
        stats
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
