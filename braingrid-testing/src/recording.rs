//! Dependents that record every lifecycle call they receive.

use async_trait::async_trait;
use braingrid_leader::Dependent;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle method names as recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    TransitionLeader,
    TransitionFollower,
    UpdateLeader,
    UpdateFollower,
    Shutdown,
}

impl Phase {
    pub fn is_transition(&self) -> bool {
        matches!(self, Phase::TransitionLeader | Phase::TransitionFollower)
    }
}

#[derive(Debug, Clone)]
pub struct DependentCall {
    pub node: String,
    pub dependent: String,
    pub phase: Phase,
    pub at: Instant,
}

/// Call log shared by every recorder in a harness
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<DependentCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, call: DependentCall) {
        self.calls.lock().push(call);
    }

    pub fn all(&self) -> Vec<DependentCall> {
        self.calls.lock().clone()
    }

    pub fn for_node(&self, node: &str) -> Vec<DependentCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.node == node)
            .cloned()
            .collect()
    }

    /// Transition calls only, for one node, in call order
    pub fn transitions(&self, node: &str) -> Vec<(String, Phase)> {
        self.for_node(node)
            .into_iter()
            .filter(|c| c.phase.is_transition())
            .map(|c| (c.dependent, c.phase))
            .collect()
    }

    pub fn count(&self, node: &str, phase: Phase) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.node == node && c.phase == phase)
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// What a recorder does when called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Fail,
    Panic,
    Stall(Duration),
}

/// Records every call into a [`CallLog`] and can be told to misbehave on one
/// phase.
pub struct RecordingDependent {
    node: String,
    name: String,
    log: CallLog,
    misbehave_on: Option<(Phase, Behaviour)>,
    critical: bool,
}

impl RecordingDependent {
    pub fn new(node: impl Into<String>, name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            node: node.into(),
            name: name.into(),
            log: log.clone(),
            misbehave_on: None,
            critical: false,
        }
    }

    pub fn failing_on(mut self, phase: Phase) -> Self {
        self.misbehave_on = Some((phase, Behaviour::Fail));
        self
    }

    pub fn panicking_on(mut self, phase: Phase) -> Self {
        self.misbehave_on = Some((phase, Behaviour::Panic));
        self
    }

    /// Sleeps inside `phase` after recording the call.
    pub fn stalling_on(mut self, phase: Phase, delay: Duration) -> Self {
        self.misbehave_on = Some((phase, Behaviour::Stall(delay)));
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Dependent> {
        Arc::new(self)
    }

    async fn call(&self, phase: Phase) -> anyhow::Result<()> {
        self.log.push(DependentCall {
            node: self.node.clone(),
            dependent: self.name.clone(),
            phase,
            at: Instant::now(),
        });

        match self.misbehave_on {
            Some((p, Behaviour::Fail)) if p == phase => {
                anyhow::bail!("{} refused {:?}", self.name, phase)
            }
            Some((p, Behaviour::Panic)) if p == phase => {
                panic!("{} crashed in {:?}", self.name, phase)
            }
            Some((p, Behaviour::Stall(delay))) if p == phase => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Dependent for RecordingDependent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transition_leader(&self) -> anyhow::Result<()> {
        self.call(Phase::TransitionLeader).await
    }

    async fn transition_follower(&self) -> anyhow::Result<()> {
        self.call(Phase::TransitionFollower).await
    }

    async fn update_leader(&self) -> anyhow::Result<()> {
        self.call(Phase::UpdateLeader).await
    }

    async fn update_follower(&self) -> anyhow::Result<()> {
        self.call(Phase::UpdateFollower).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.call(Phase::Shutdown).await
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}
