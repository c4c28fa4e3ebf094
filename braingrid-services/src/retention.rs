//! Leader-only purging of aged cluster log records.

use crate::daemon::Daemon;
use async_trait::async_trait;
use braingrid_leader::Dependent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// One aggregated log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp_ms: u64,
    pub hostname: String,
    pub level: String,
    pub message: String,
}

/// Storage holding aggregated cluster logs
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, record: LogRecord) -> anyhow::Result<()>;

    /// Deletes records older than `cutoff_ms` and returns how many were removed.
    async fn purge_older_than(&self, cutoff_ms: u64) -> anyhow::Result<usize>;

    async fn len(&self) -> anyhow::Result<usize>;
}

/// In-memory store, ordered by append time.
#[derive(Default)]
pub struct MemoryLogStore {
    records: Mutex<VecDeque<LogRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, record: LogRecord) -> anyhow::Result<()> {
        self.records.lock().push_back(record);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff_ms: u64) -> anyhow::Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.timestamp_ms >= cutoff_ms);
        Ok(before - records.len())
    }

    async fn len(&self) -> anyhow::Result<usize> {
        Ok(self.records.lock().len())
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Records older than this are purged
    pub retention: Duration,

    /// Delay between purge sweeps
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Runs the purge daemon while this node is leader.
pub struct LogRetentionManager {
    store: Arc<dyn LogStore>,
    config: RetentionConfig,
    purged: Arc<AtomicU64>,
    daemon: tokio::sync::Mutex<Option<Daemon>>,
}

impl LogRetentionManager {
    pub fn new(store: Arc<dyn LogStore>, config: RetentionConfig) -> Self {
        Self {
            store,
            config,
            purged: Arc::new(AtomicU64::new(0)),
            daemon: tokio::sync::Mutex::new(None),
        }
    }

    /// Total records purged since creation.
    pub fn purged_total(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    pub async fn is_running(&self) -> bool {
        self.daemon
            .lock()
            .await
            .as_ref()
            .map(Daemon::is_running)
            .unwrap_or(false)
    }

    /// Runs one purge immediately.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        sweep(self.store.as_ref(), self.config.retention, &self.purged).await
    }

    async fn start(&self) {
        let mut daemon = self.daemon.lock().await;
        if daemon.as_ref().map(Daemon::is_running).unwrap_or(false) {
            return;
        }

        let store = Arc::clone(&self.store);
        let purged = Arc::clone(&self.purged);
        let retention = self.config.retention;

        *daemon = Some(Daemon::spawn(
            "log-retention",
            self.config.sweep_interval,
            move || {
                let store = Arc::clone(&store);
                let purged = Arc::clone(&purged);
                async move {
                    if let Err(e) = sweep(store.as_ref(), retention, &purged).await {
                        warn!("Log retention sweep failed: {:#}", e);
                    }
                }
            },
        ));
        info!(
            "Log retention started, keeping {:?} of records",
            self.config.retention
        );
    }

    async fn stop(&self) {
        if let Some(daemon) = self.daemon.lock().await.take() {
            daemon.stop().await;
            info!("Log retention stopped");
        }
    }
}

async fn sweep(store: &dyn LogStore, retention: Duration, purged: &AtomicU64) -> anyhow::Result<usize> {
    let cutoff = now_millis().saturating_sub(retention.as_millis() as u64);
    let removed = store.purge_older_than(cutoff).await?;
    if removed > 0 {
        purged.fetch_add(removed as u64, Ordering::Relaxed);
        debug!("Purged {} log records older than {}", removed, cutoff);
    }
    Ok(removed)
}

#[async_trait]
impl Dependent for LogRetentionManager {
    fn name(&self) -> &str {
        "log-retention"
    }

    async fn transition_leader(&self) -> anyhow::Result<()> {
        self.start().await;
        Ok(())
    }

    async fn transition_follower(&self) -> anyhow::Result<()> {
        self.stop().await;
        Ok(())
    }

    async fn update_leader(&self) -> anyhow::Result<()> {
        self.start().await;
        Ok(())
    }

    async fn update_follower(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop().await;
        Ok(())
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

    fn record(age: Duration) -> LogRecord {
        LogRecord {
            timestamp_ms: now_millis() - age.as_millis() as u64,
            hostname: "node-a".to_string(),
            level: "INFO".to_string(),
            message: "tick".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_aged_records() {
        let store = Arc::new(MemoryLogStore::new());
        store.append(record(Duration::from_secs(3600))).await.unwrap();
        store.append(record(Duration::from_secs(1))).await.unwrap();

        let manager = LogRetentionManager::new(
            store.clone(),
            RetentionConfig {
                retention: Duration::from_secs(60),
                sweep_interval: Duration::from_secs(60),
            },
        );

        assert_eq!(manager.sweep_once().await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(manager.purged_total(), 1);
    }

    #[tokio::test]
    async fn test_daemon_follows_role() {
        let store = Arc::new(MemoryLogStore::new());
        store.append(record(Duration::from_secs(3600))).await.unwrap();

        let manager = LogRetentionManager::new(
            store.clone(),
            RetentionConfig {
                retention: Duration::from_secs(60),
                sweep_interval: Duration::from_millis(10),
            },
        );

        manager.update_follower().await.unwrap();
        assert!(!manager.is_running().await);

        manager.transition_leader().await.unwrap();
        assert!(manager.is_running().await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.len().await.unwrap(), 0);

        manager.transition_follower().await.unwrap();
        assert!(!manager.is_running().await);

        manager.transition_leader().await.unwrap();
        manager.shutdown().await.unwrap();
        assert!(!manager.is_running().await);
    }
}
