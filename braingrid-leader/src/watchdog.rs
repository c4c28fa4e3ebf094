//! Leader liveness and membership watchdog.

use crate::{ElectionEngine, LeaderError, LeaderNotificationBus, LeaderResult, MembershipRegistrar};
use braingrid_core::{ClusterRole, CoordError, CoordinationClient, MembershipDelta, MembershipSet, WatchEvent, Watcher};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Outcome of a single watchdog iteration
#[derive(Debug, Clone, Default)]
pub struct WatchdogReport {
    /// Whether the leader lock existed at the start of the iteration
    pub lock_present: bool,

    /// Round-trip time of the lock existence probe
    pub probe_latency: Duration,

    /// The lock was missing and a re-election ran
    pub reelection_triggered: bool,

    /// This node believed it was leader but the lock named another node
    pub demoted: bool,

    /// Membership changes since the previous iteration
    pub delta: MembershipDelta,

    /// This node's presence entry was missing and has been re-created
    pub presence_restored: bool,

    /// Role held at the end of the iteration
    pub role: ClusterRole,
}

enum Wake {
    Timer,
    Shutdown,
    LockEvent(Option<WatchEvent>),
    NodesEvent(Option<WatchEvent>),
}

/// Re-validates the leader lock and membership on every iteration.
pub struct LeaderWatchdog {
    client: Arc<dyn CoordinationClient>,
    engine: Arc<ElectionEngine>,
    registrar: Arc<MembershipRegistrar>,
    notifications: Arc<LeaderNotificationBus>,
    interval: Duration,
    members: Mutex<Option<MembershipSet>>,
}

impl LeaderWatchdog {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        engine: Arc<ElectionEngine>,
        registrar: Arc<MembershipRegistrar>,
        notifications: Arc<LeaderNotificationBus>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            engine,
            registrar,
            notifications,
            interval,
            members: Mutex::new(None),
        }
    }

    /// Last membership observed by the watchdog.
    pub fn members(&self) -> MembershipSet {
        self.members.lock().clone().unwrap_or_default()
    }

    /// Runs one watchdog iteration.
    ///
    /// The membership step runs even when the lock checks fail; the first
    /// error is returned afterwards.
    pub async fn poll_once(&self) -> LeaderResult<WatchdogReport> {
        let mut report = WatchdogReport::default();
        let lock_result = self.check_lock(&mut report).await;
        let membership_result = self.check_membership(&mut report).await;

        report.role = self.engine.role();
        lock_result?;
        membership_result?;
        Ok(report)
    }

    async fn check_lock(&self, report: &mut WatchdogReport) -> LeaderResult<()> {
        let name = self.engine.identity().name();

        let started = Instant::now();
        report.lock_present = self.engine.check_if_leader_exists().await?;
        report.probe_latency = started.elapsed();
        debug!(
            node = %name,
            latency_ms = report.probe_latency.as_secs_f64() * 1000.0,
            "Leader lock probe"
        );

        if !report.lock_present {
            self.leader_timeout().await?;
            report.reelection_triggered = true;
        } else if self.engine.is_leader() {
            // The lock is the source of truth, never local state.
            match self.engine.leader_record().await {
                Ok(Some(record)) if record.is_owned_by(name) => {}
                Ok(Some(record)) => {
                    report.demoted = self.engine.demote(Some(record.hostname)).await;
                }
                Ok(None) => debug!("Leader lock vanished after probe, next iteration re-elects"),
                Err(LeaderError::Coordination(CoordError::Serialization { message })) => {
                    warn!(node = %name, "Leader lock is unreadable: {}", message);
                    report.demoted = self.engine.demote(None).await;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn check_membership(&self, report: &mut WatchdogReport) -> LeaderResult<()> {
        let name = self.engine.identity().name();

        let current = self.registrar.list_members().await?;
        report.delta = self.record_membership(current.clone());
        for joined in &report.delta.joined {
            info!(node = %name, "Node {} joined the cluster", joined);
            self.notifications.notify_node_joined(joined).await;
        }
        for left in &report.delta.left {
            info!(node = %name, "Node {} left the cluster", left);
            self.notifications.notify_node_left(left).await;
        }

        if !self.registrar.is_registered_in(&current) {
            warn!(node = %name, "Own presence entry missing, re-registering");
            self.registrar.register_presence().await?;
            report.presence_restored = true;
            self.notifications.notify_presence_restored(name).await;
        }
        Ok(())
    }

    /// Handles a missing leader lock: drop to Follower and re-elect.
    pub async fn leader_timeout(&self) -> LeaderResult<ClusterRole> {
        let name = self.engine.identity().name();
        warn!(node = %name, "No leader present, triggering re-election");
        self.notifications.notify_leader_timeout(name).await;

        self.engine.mark_follower().await;
        self.engine.auto_init_leader().await
    }

    /// Polls until shutdown.
    ///
    /// Wakes on the interval, measured from the start of the previous
    /// iteration, or earlier on a change to the leader lock or the nodes
    /// path. Transient errors are logged and retried. Session loss ends the
    /// loop with [`LeaderError::SessionLost`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> LeaderResult<()> {
        let paths = self.engine.paths().clone();
        let mut lock_watch: Option<Watcher> = None;
        let mut nodes_watch: Option<Watcher> = None;

        info!(
            node = %self.engine.identity(),
            "Watchdog started with interval {:?}", self.interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if lock_watch.is_none() {
                lock_watch = self.client.watch(&paths.leader()).ok();
            }
            if nodes_watch.is_none() {
                nodes_watch = self.client.watch(&paths.nodes()).ok();
            }

            let started = Instant::now();
            match self.poll_once().await {
                Ok(report) => debug!(?report, "Watchdog iteration complete"),
                Err(e) if e.is_fatal() => {
                    error!("Watchdog stopping: {}", e);
                    return Err(match e {
                        LeaderError::Coordination(inner) => LeaderError::from_coord(inner),
                        other => other,
                    });
                }
                Err(e) => warn!("Watchdog iteration failed: {}", e),
            }

            // Events caused by this iteration's own writes are already handled.
            drain(&mut lock_watch);
            drain(&mut nodes_watch);

            let delay = self.interval.saturating_sub(started.elapsed());
            let wake = tokio::select! {
                _ = tokio::time::sleep(delay) => Wake::Timer,
                changed = shutdown.changed() => {
                    if changed.is_err() { Wake::Shutdown } else { Wake::Timer }
                }
                event = next_event(&mut lock_watch) => Wake::LockEvent(event),
                event = next_event(&mut nodes_watch) => Wake::NodesEvent(event),
            };

            match wake {
                Wake::Timer => {}
                Wake::Shutdown => break,
                Wake::LockEvent(Some(event)) | Wake::NodesEvent(Some(event)) => {
                    debug!("Watchdog woken by {} on {}", event.kind, event.path);
                }
                Wake::LockEvent(None) => lock_watch = None,
                Wake::NodesEvent(None) => nodes_watch = None,
            }
        }

        info!(node = %self.engine.identity(), "Watchdog stopped");
        Ok(())
    }

    fn record_membership(&self, current: MembershipSet) -> MembershipDelta {
        let mut members = self.members.lock();
        let delta = match members.as_ref() {
            Some(previous) => MembershipRegistrar::diff_membership(previous, &current),
            None => MembershipDelta::default(),
        };
        *members = Some(current);
        delta
    }
}

async fn next_event(watcher: &mut Option<Watcher>) -> Option<WatchEvent> {
    match watcher {
        Some(w) => w.recv().await,
        None => std::future::pending().await,
    }
}

fn drain(watcher: &mut Option<Watcher>) {
    if let Some(w) = watcher {
        while w.try_recv().is_ok() {}
    }
}
