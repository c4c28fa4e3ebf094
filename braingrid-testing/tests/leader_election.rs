//! At most one node ever holds the leader lock.

use std::sync::Arc;
use std::time::Duration;

use braingrid_coord::{Ensemble, EnsembleConfig, EnsembleSession};
use braingrid_core::{CoordinationClient, CreateMode, LeaderRecord};
use braingrid_testing::{init_test_logging, wait_until, ClusterHarness, HarnessConfig};
use proptest::prelude::*;

const LOCK: &str = "/model/Leader";
const SESSIONS: usize = 5;

#[derive(Debug, Clone)]
enum Op {
    /// These sessions race to create the lock at the same time
    Attempt(Vec<usize>),
    /// Session crashes and is replaced by a fresh one
    Kill(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => proptest::collection::vec(0..SESSIONS, 1..=SESSIONS).prop_map(Op::Attempt),
        1 => (0..SESSIONS).prop_map(Op::Kill),
    ]
}

async fn attempt(session: EnsembleSession, index: usize) -> bool {
    let record = LeaderRecord::new(format!("node-{}", index), "127.0.0.1");
    let data = match record.to_bytes() {
        Ok(data) => data,
        Err(_) => return false,
    };
    session.create(LOCK, data, CreateMode::Ephemeral).await.is_ok()
}

fn run_model(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

    runtime.block_on(async move {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let setup = ensemble.connect();
        setup.ensure_path("/model").await.unwrap();

        let mut sessions: Vec<EnsembleSession> =
            (0..SESSIONS).map(|_| ensemble.connect()).collect();

        for op in ops {
            match op {
                Op::Attempt(indices) => {
                    let held_before = ensemble.entry(LOCK).is_some();

                    let handles: Vec<_> = indices
                        .iter()
                        .map(|&i| tokio::spawn(attempt(sessions[i].clone(), i)))
                        .collect();
                    let mut winners = 0;
                    for handle in handles {
                        if handle.await.unwrap() {
                            winners += 1;
                        }
                    }

                    prop_assert!(winners <= 1, "{} concurrent creates succeeded", winners);
                    if held_before {
                        prop_assert_eq!(winners, 0);
                    }
                }
                Op::Kill(i) => {
                    ensemble.expire_session(sessions[i].id());
                    sessions[i] = ensemble.connect();
                }
            }

            // The lock, when present, always belongs to a live session.
            if let Some(entry) = ensemble.entry(LOCK) {
                let owner = entry.ephemeral_owner.unwrap();
                prop_assert!(ensemble.is_session_alive(owner));
            }
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_at_most_one_lock_holder(ops in proptest::collection::vec(op_strategy(), 1..30)) {
        run_model(ops)?;
    }
}

#[tokio::test]
async fn test_concurrent_boot_elects_exactly_one_leader() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness
        .start_nodes(&["alpha", "bravo", "charlie", "delta", "echo"])
        .unwrap();

    let leader = harness
        .wait_for_leader(Duration::from_secs(2))
        .await
        .expect("a leader should be elected");

    // Give every node time to settle, then check nobody else claims leadership.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.self_declared_leaders(), vec![leader.clone()]);
    assert_eq!(harness.leader_record().unwrap().hostname, leader);
    assert_eq!(harness.registered_members().len(), 5);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_election_queue_is_cleaned_up() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b", "c"]).unwrap();
    harness.wait_for_leader(Duration::from_secs(2)).await.unwrap();

    let election = harness.paths().election();
    let settled = wait_until(Duration::from_secs(2), || {
        let empty = harness.admin().clone();
        let election = election.clone();
        async move {
            empty
                .children(&election)
                .await
                .map(|c| c.is_empty())
                .unwrap_or(false)
        }
    })
    .await;
    assert!(settled, "election candidates should be released");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_follower_session_sees_same_leader() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b"]).unwrap();
    let leader = harness.wait_for_leader(Duration::from_secs(2)).await.unwrap();

    for name in ["a", "b"] {
        let node = harness.node(name).unwrap();
        let record = node.handle.leader_record().await.unwrap().unwrap();
        assert_eq!(record.hostname, leader);
    }

    let observer: Arc<dyn CoordinationClient> = Arc::new(harness.ensemble().connect());
    assert!(observer.exists(&harness.paths().leader()).await.unwrap());

    harness.shutdown().await;
}
