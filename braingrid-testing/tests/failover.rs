//! Leader loss and lock tampering scenarios.

use std::time::{Duration, Instant};

use braingrid_core::{CoordinationClient, LeaderRecord};
use braingrid_leader::LeaderError;
use braingrid_testing::{
    init_test_logging, wait_until, ClusterHarness, FaultOutcome, FaultType, HarnessConfig, Phase,
};

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_leader_crash_promotes_survivor() {
    init_test_logging();

    let config = HarnessConfig::default();
    let interval = config.watchdog_interval;
    let mut harness = ClusterHarness::new(config);

    harness.start_node("a").unwrap();
    let first = harness.wait_for_leader(SETTLE).await.unwrap();
    assert_eq!(first, "a");
    let first_record = harness.leader_record().unwrap();

    harness.start_nodes(&["b", "c"]).unwrap();
    let joined = wait_until(SETTLE, || {
        std::future::ready(harness.registered_members().len() == 3)
    })
    .await;
    assert!(joined);

    let killed_at = Instant::now();
    let outcome = harness.inject(FaultType::KillLeader).await;
    assert!(matches!(outcome, FaultOutcome::Killed { ref node, .. } if node == "a"));

    let next = harness
        .wait_for_new_leader("a", SETTLE)
        .await
        .expect("a survivor should take over");
    let took = killed_at.elapsed();

    assert!(next == "b" || next == "c");
    assert!(
        took < interval * 2 + Duration::from_secs(1),
        "failover took {:?}",
        took
    );

    let record = harness.leader_record().unwrap();
    assert_eq!(record.hostname, next);
    assert_ne!(record, first_record);
    let sole = wait_until(SETTLE, || {
        std::future::ready(harness.self_declared_leaders() == vec![next.clone()])
    })
    .await;
    assert!(sole, "only the new leader should claim leadership");

    // The crashed node's run loop ends on session loss.
    let crashed = harness.node_mut("a").unwrap().join().await.unwrap();
    assert!(matches!(crashed, Err(LeaderError::SessionLost { .. })));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_deleted_lock_yields_exactly_one_leader() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b", "c"]).unwrap();
    harness.wait_for_leader(SETTLE).await.unwrap();

    assert_eq!(
        harness.inject(FaultType::DeleteLeaderLock).await,
        FaultOutcome::Applied
    );

    let recovered = wait_until(SETTLE, || {
        let leaders = harness.self_declared_leaders();
        let record = harness.leader_record();
        std::future::ready(
            leaders.len() == 1 && record.map(|r| r.hostname) == leaders.first().cloned(),
        )
    })
    .await;
    assert!(recovered, "cluster should converge on one leader");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.self_declared_leaders().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_overwritten_lock_demotes_leader() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b"]).unwrap();
    let leader = harness.wait_for_leader(SETTLE).await.unwrap();

    harness
        .inject(FaultType::OverwriteLeaderLock {
            hostname: "ghost".to_string(),
        })
        .await;

    let demoted = wait_until(SETTLE, || {
        std::future::ready(harness.log().count(&leader, Phase::TransitionFollower) >= 1)
    })
    .await;
    assert!(demoted, "leader should step down when the lock names another host");
    assert!(harness.self_declared_leaders().is_empty());
    assert_eq!(harness.leader_record().unwrap().hostname, "ghost");

    // Nodes stay up as followers.
    assert!(harness.node(&leader).unwrap().is_running());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transient_outage_is_tolerated() {
    init_test_logging();

    let config = HarnessConfig::default();
    let outage = config.watchdog_interval * 3;
    let mut harness = ClusterHarness::new(config);
    harness.start_nodes(&["a", "b", "c"]).unwrap();
    let leader = harness.wait_for_leader(SETTLE).await.unwrap();

    harness
        .inject(FaultType::Outage { duration: outage })
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    for name in harness.names() {
        assert!(harness.node(&name).unwrap().is_running(), "{} stopped", name);
    }
    assert_eq!(harness.self_declared_leaders(), vec![leader.clone()]);
    assert_eq!(harness.leader_record().unwrap().hostname, leader);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_follower_crash_keeps_leader() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b", "c"]).unwrap();
    let leader = harness.wait_for_leader(SETTLE).await.unwrap();

    let outcome = harness.inject(FaultType::KillRandomFollower).await;
    let FaultOutcome::Killed { node, .. } = outcome else {
        panic!("expected a follower to be killed, got {:?}", outcome);
    };
    assert_ne!(node, leader);

    let gone = wait_until(SETTLE, || {
        std::future::ready(!harness.registered_members().contains(&node))
    })
    .await;
    assert!(gone);
    assert_eq!(harness.self_declared_leaders(), vec![leader]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rogue_lock_blocks_election_until_released() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    for parent in harness.paths().persistent_parents() {
        harness.admin().ensure_path(&parent).await.unwrap();
    }

    let rogue = LeaderRecord::new("rogue", "192.0.2.9");
    assert!(
        harness
            .plant(&harness.paths().leader(), rogue.to_bytes().unwrap())
            .await
    );

    harness.start_nodes(&["a", "b"]).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.self_declared_leaders().is_empty());

    // Once the rogue session dies the cluster elects one of its own.
    harness.admin().close().await.unwrap();
    let leader = harness.wait_for_leader(SETTLE).await;
    assert!(leader.is_some());

    harness.shutdown().await;
}
