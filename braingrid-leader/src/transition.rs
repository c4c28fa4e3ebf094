//! Role-transition fan-out to dependent subsystems.
//!
//! The [`RoleTransitionManager`] mirrors the election state and, once per
//! iteration, calls exactly one lifecycle method on every registered
//! [`Dependent`], sequentially and in registration order.

use crate::{LeaderError, LeaderResult, RoleWatch};
use async_trait::async_trait;
use braingrid_core::{ClusterRole, RoleTransitionEvent};
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Lifecycle contract of a subsystem whose resources depend on the node role.
///
/// Transition methods are called once per role change. Update methods are
/// called on every steady-state iteration and must be cheap when there is
/// nothing to do.
#[async_trait]
pub trait Dependent: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// Start leader-only resources
    async fn transition_leader(&self) -> anyhow::Result<()>;

    /// Stop leader-only resources and go idle
    async fn transition_follower(&self) -> anyhow::Result<()>;

    /// Incremental leader-side work
    async fn update_leader(&self) -> anyhow::Result<()>;

    /// Incremental follower-side work
    async fn update_follower(&self) -> anyhow::Result<()>;

    /// Stop every task the dependent owns. Called once on process shutdown.
    async fn shutdown(&self) -> anyhow::Result<()>;

    /// A critical dependent's failure stops the node instead of being skipped.
    fn is_critical(&self) -> bool {
        false
    }
}

/// The four mutually exclusive dispatch branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Dispatch {
    BecameFollower,
    BecameLeader,
    SteadyFollower,
    SteadyLeader,
}

impl Dispatch {
    pub fn select(role: ClusterRole, changed: bool) -> Self {
        match (role, changed) {
            (ClusterRole::Follower, true) => Dispatch::BecameFollower,
            (ClusterRole::Leader, true) => Dispatch::BecameLeader,
            (ClusterRole::Follower, false) => Dispatch::SteadyFollower,
            (ClusterRole::Leader, false) => Dispatch::SteadyLeader,
        }
    }

    /// Name of the lifecycle method this branch calls
    pub fn phase(&self) -> &'static str {
        match self {
            Dispatch::BecameFollower => "transition_follower",
            Dispatch::BecameLeader => "transition_leader",
            Dispatch::SteadyFollower => "update_follower",
            Dispatch::SteadyLeader => "update_leader",
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(self, Dispatch::BecameFollower | Dispatch::BecameLeader)
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.phase())
    }
}

/// A dependent call that returned an error or panicked
#[derive(Debug, Clone, Serialize)]
pub struct DependentFailure {
    pub dependent: String,
    pub phase: &'static str,
    pub reason: String,
    pub critical: bool,
}

impl From<DependentFailure> for LeaderError {
    fn from(failure: DependentFailure) -> Self {
        LeaderError::TransitionFailed {
            dependent: failure.dependent,
            phase: failure.phase.to_string(),
            reason: failure.reason,
        }
    }
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub dispatch: Dispatch,
    pub role: ClusterRole,
    pub invoked: usize,
    pub failures: Vec<DependentFailure>,
}

impl TransitionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Leader-follower transition manager
pub struct RoleTransitionManager {
    roles: RoleWatch,
    dependents: Vec<Arc<dyn Dependent>>,
    current_role: ClusterRole,
    has_role_changed: bool,
    leader_resources_active: bool,
    interval: Duration,
    shut_down: bool,
}

impl RoleTransitionManager {
    /// Starts as Follower with no pending change, so dependents are expected
    /// to boot idle.
    pub fn new(roles: RoleWatch, interval: Duration) -> Self {
        Self {
            roles,
            dependents: Vec::new(),
            current_role: ClusterRole::Follower,
            has_role_changed: false,
            leader_resources_active: false,
            interval,
            shut_down: false,
        }
    }

    /// Adds a dependent. Call order follows registration order.
    pub fn register(&mut self, dependent: Arc<dyn Dependent>) {
        info!("Registered dependent {}", dependent.name());
        self.dependents.push(dependent);
    }

    pub fn dependent_names(&self) -> Vec<String> {
        self.dependents.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn current_role(&self) -> ClusterRole {
        self.current_role
    }

    /// Runs one iteration: observe the role, pick a branch, fan out.
    ///
    /// Failures of non-critical dependents are reported, not returned.
    pub async fn step(&mut self) -> LeaderResult<TransitionReport> {
        let observed = self.roles.role();
        if observed != self.current_role {
            let event = RoleTransitionEvent::new(self.current_role, observed);
            info!("Role change detected: {}", event);
            self.current_role = observed;
            self.has_role_changed = true;
        }

        let dispatch = Dispatch::select(self.current_role, self.has_role_changed);
        self.has_role_changed = false;

        // Marked before the fan-out: if this future is dropped mid-pass, some
        // dependents may already hold leader resources.
        if dispatch == Dispatch::BecameLeader {
            self.leader_resources_active = true;
        }
        let report = self.fan_out(dispatch).await;
        if dispatch == Dispatch::BecameFollower {
            self.leader_resources_active = false;
        }

        if let Some(failure) = report.failures.iter().find(|f| f.critical) {
            return Err(failure.clone().into());
        }
        Ok(report)
    }

    /// Steps until shutdown, waking on the interval or a role change.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> LeaderResult<()> {
        info!(
            "Role transition manager started with {} dependents",
            self.dependents.len()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            self.step().await?;

            let delay = self.interval.saturating_sub(started.elapsed());
            let stop = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                changed = self.roles.changed() => changed.is_err(),
                changed = shutdown.changed() => changed.is_err(),
            };
            if stop {
                break;
            }
        }

        info!("Role transition manager stopped");
        Ok(())
    }

    /// Tears down every dependent.
    ///
    /// Leader resources are released first if the last dispatched transition
    /// was to Leader, then `shutdown` runs on each dependent in reverse
    /// registration order. Every dependent is called even if an earlier one
    /// fails; the first failure is returned.
    pub async fn shutdown_system(&mut self) -> LeaderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let mut failures = Vec::new();

        if self.leader_resources_active {
            info!("Releasing leader resources before shutdown");
            let report = self.fan_out(Dispatch::BecameFollower).await;
            failures.extend(report.failures);
            self.leader_resources_active = false;
            self.current_role = ClusterRole::Follower;
        }

        for dependent in self.dependents.iter().rev() {
            if let Some(failure) =
                invoke(dependent.as_ref(), "shutdown", dependent.shutdown()).await
            {
                failures.push(failure);
            }
        }

        info!(
            "Shut down {} dependents, {} failures",
            self.dependents.len(),
            failures.len()
        );

        match failures.into_iter().next() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    async fn fan_out(&self, dispatch: Dispatch) -> TransitionReport {
        if dispatch.is_transition() {
            info!("Dispatching {} to {} dependents", dispatch, self.dependents.len());
        } else {
            debug!("Dispatching {} to {} dependents", dispatch, self.dependents.len());
        }

        let mut failures = Vec::new();
        for dependent in &self.dependents {
            let call = match dispatch {
                Dispatch::BecameFollower => dependent.transition_follower(),
                Dispatch::BecameLeader => dependent.transition_leader(),
                Dispatch::SteadyFollower => dependent.update_follower(),
                Dispatch::SteadyLeader => dependent.update_leader(),
            };
            if let Some(failure) = invoke(dependent.as_ref(), dispatch.phase(), call).await {
                failures.push(failure);
            }
        }

        TransitionReport {
            dispatch,
            role: self.current_role,
            invoked: self.dependents.len(),
            failures,
        }
    }
}

impl fmt::Debug for RoleTransitionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleTransitionManager")
            .field("dependents", &self.dependent_names())
            .field("current_role", &self.current_role)
            .field("leader_resources_active", &self.leader_resources_active)
            .finish()
    }
}

/// Awaits one dependent call, converting errors and panics into a failure.
async fn invoke<F>(dependent: &dyn Dependent, phase: &'static str, call: F) -> Option<DependentFailure>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let reason = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => return None,
        Ok(Err(e)) => format!("{:#}", e),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };

    error!(
        dependent = dependent.name(),
        phase, "Dependent call failed: {}", reason
    );

    Some(DependentFailure {
        dependent: dependent.name().to_string(),
        phase,
        reason,
        critical: dependent.is_critical(),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ElectionState;
    use anyhow::bail;
    use parking_lot::Mutex;

    type CallLog = Arc<Mutex<Vec<(String, &'static str)>>>;

    #[derive(Clone, Copy, PartialEq)]
    enum Behaviour {
        Ok,
        Fail,
        Panic,
        Stall,
    }

    struct Stub {
        name: String,
        log: CallLog,
        on_transition_leader: Behaviour,
        critical: bool,
    }

    impl Stub {
        fn new(name: &str, log: &CallLog) -> Arc<Self> {
            Self::with(name, log, Behaviour::Ok, false)
        }

        fn with(name: &str, log: &CallLog, behaviour: Behaviour, critical: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                on_transition_leader: behaviour,
                critical,
            })
        }

        fn record(&self, phase: &'static str) {
            self.log.lock().push((self.name.clone(), phase));
        }
    }

    #[async_trait]
    impl Dependent for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        async fn transition_leader(&self) -> anyhow::Result<()> {
            self.record("transition_leader");
            match self.on_transition_leader {
                Behaviour::Ok => Ok(()),
                Behaviour::Fail => bail!("cannot start"),
                Behaviour::Panic => panic!("boom"),
                Behaviour::Stall => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }

        async fn transition_follower(&self) -> anyhow::Result<()> {
            self.record("transition_follower");
            Ok(())
        }

        async fn update_leader(&self) -> anyhow::Result<()> {
            self.record("update_leader");
            Ok(())
        }

        async fn update_follower(&self) -> anyhow::Result<()> {
            self.record("update_follower");
            Ok(())
        }

        async fn shutdown(&self) -> anyhow::Result<()> {
            self.record("shutdown");
            Ok(())
        }

        fn is_critical(&self) -> bool {
            self.critical
        }
    }

    fn manager() -> (watch::Sender<ElectionState>, RoleTransitionManager) {
        let (tx, rx) = watch::channel(ElectionState::Follower);
        let manager = RoleTransitionManager::new(RoleWatch::new(rx), Duration::from_millis(10));
        (tx, manager)
    }

    #[test]
    fn test_dispatch_selection() {
        assert_eq!(
            Dispatch::select(ClusterRole::Leader, true),
            Dispatch::BecameLeader
        );
        assert_eq!(
            Dispatch::select(ClusterRole::Follower, false),
            Dispatch::SteadyFollower
        );
        assert_eq!(Dispatch::BecameFollower.phase(), "transition_follower");
    }

    #[tokio::test]
    async fn test_initial_iteration_is_steady_follower() {
        let log = CallLog::default();
        let (_tx, mut manager) = manager();
        manager.register(Stub::new("a", &log));

        let report = manager.step().await.unwrap();
        assert_eq!(report.dispatch, Dispatch::SteadyFollower);
        assert_eq!(*log.lock(), vec![("a".to_string(), "update_follower")]);
    }

    #[tokio::test]
    async fn test_promotion_calls_transition_leader_once_in_order() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        for name in ["telemetry", "retention", "cli"] {
            manager.register(Stub::new(name, &log));
        }

        tx.send(ElectionState::Leader).unwrap();
        let report = manager.step().await.unwrap();

        assert_eq!(report.dispatch, Dispatch::BecameLeader);
        assert_eq!(
            *log.lock(),
            vec![
                ("telemetry".to_string(), "transition_leader"),
                ("retention".to_string(), "transition_leader"),
                ("cli".to_string(), "transition_leader"),
            ]
        );

        log.lock().clear();
        let report = manager.step().await.unwrap();
        assert_eq!(report.dispatch, Dispatch::SteadyLeader);
        assert!(log.lock().iter().all(|(_, phase)| *phase == "update_leader"));
    }

    #[tokio::test]
    async fn test_election_in_progress_reads_as_follower() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        manager.register(Stub::new("a", &log));

        tx.send(ElectionState::ElectionInProgress).unwrap();
        let report = manager.step().await.unwrap();
        assert_eq!(report.dispatch, Dispatch::SteadyFollower);
    }

    #[tokio::test]
    async fn test_failing_dependent_does_not_block_others() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        manager.register(Stub::with("broken", &log, Behaviour::Fail, false));
        manager.register(Stub::with("panicky", &log, Behaviour::Panic, false));
        manager.register(Stub::new("healthy", &log));

        tx.send(ElectionState::Leader).unwrap();
        let report = manager.step().await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].dependent, "broken");
        assert!(report.failures[1].reason.contains("boom"));
        assert!(log
            .lock()
            .contains(&("healthy".to_string(), "transition_leader")));
    }

    #[tokio::test]
    async fn test_interrupted_promotion_is_released_on_shutdown() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        manager.register(Stub::new("fast", &log));
        manager.register(Stub::with("slow", &log, Behaviour::Stall, false));

        tx.send(ElectionState::Leader).unwrap();
        let interrupted = tokio::time::timeout(Duration::from_millis(50), manager.step()).await;
        assert!(interrupted.is_err());

        log.lock().clear();
        manager.shutdown_system().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                ("fast".to_string(), "transition_follower"),
                ("slow".to_string(), "transition_follower"),
                ("slow".to_string(), "shutdown"),
                ("fast".to_string(), "shutdown"),
            ]
        );
    }

    #[tokio::test]
    async fn test_critical_failure_escalates() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        manager.register(Stub::with("link", &log, Behaviour::Fail, true));
        manager.register(Stub::new("after", &log));

        tx.send(ElectionState::Leader).unwrap();
        let err = manager.step().await.unwrap_err();

        assert!(matches!(err, LeaderError::TransitionFailed { ref dependent, .. } if dependent == "link"));
        assert!(err.is_fatal());
        // The remaining dependents were still called.
        assert!(log.lock().contains(&("after".to_string(), "transition_leader")));
    }

    #[tokio::test]
    async fn test_shutdown_releases_leader_resources_in_reverse() {
        let log = CallLog::default();
        let (tx, mut manager) = manager();
        manager.register(Stub::new("a", &log));
        manager.register(Stub::new("b", &log));

        tx.send(ElectionState::Leader).unwrap();
        manager.step().await.unwrap();
        log.lock().clear();

        manager.shutdown_system().await.unwrap();
        assert_eq!(
            *log.lock(),
            vec![
                ("a".to_string(), "transition_follower"),
                ("b".to_string(), "transition_follower"),
                ("b".to_string(), "shutdown"),
                ("a".to_string(), "shutdown"),
            ]
        );

        // Second call is a no-op.
        log.lock().clear();
        manager.shutdown_system().await.unwrap();
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let log = CallLog::default();
        let (_tx, mut manager) = manager();
        manager.register(Stub::new("a", &log));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            manager.run(stop_rx).await.unwrap();
            manager
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let manager = handle.await.unwrap();

        assert_eq!(manager.current_role(), ClusterRole::Follower);
        assert!(log.lock().len() >= 2);
    }
}
