//! Presence registration and self-healing membership.

use std::time::Duration;

use braingrid_leader::{
    LeaderNotification, MembershipRegistrar, NotificationFilter, TopologyChange,
};
use braingrid_testing::{init_test_logging, wait_until, ClusterHarness, FaultType, HarnessConfig};
use tokio::time::timeout;

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_deleted_presence_is_restored() {
    init_test_logging();

    let config = HarnessConfig::default();
    let interval = config.watchdog_interval;
    let mut harness = ClusterHarness::new(config);
    harness.start_nodes(&["a", "b"]).unwrap();
    harness.wait_for_leader(SETTLE).await.unwrap();
    assert!(
        wait_until(SETTLE, || std::future::ready(harness.registered_members().len() == 2)).await
    );

    let (_id, mut events) = harness
        .node("b")
        .unwrap()
        .handle
        .notifications()
        .subscribe(NotificationFilter::Topology)
        .await
        .unwrap();

    harness
        .inject(FaultType::DeletePresence {
            node: "b".to_string(),
        })
        .await;

    let restored = wait_until(interval * 2 + Duration::from_millis(500), || {
        std::future::ready(harness.registered_members().contains(&"b".to_string()))
    })
    .await;
    assert!(restored, "presence should be re-created by the watchdog");

    let event = timeout(SETTLE, async {
        loop {
            match events.recv().await {
                Some(LeaderNotification::Topology(TopologyChange::PresenceRestored {
                    hostname,
                    ..
                })) => break hostname,
                Some(_) => continue,
                None => panic!("notification bus closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event, "b");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_register_presence_is_idempotent() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    let handle = harness.start_node("a").unwrap();
    harness.wait_for_leader(SETTLE).await.unwrap();

    let registrar = MembershipRegistrar::new(
        handle.client().clone(),
        handle.identity().clone(),
        handle.paths().clone(),
        "127.0.0.1",
    );
    registrar.register_presence().await.unwrap();
    registrar.register_presence().await.unwrap();

    let members = registrar.list_members().await.unwrap();
    assert_eq!(members.len(), 1);
    assert!(registrar.is_registered_in(&members));

    let entry = harness.ensemble().entry(&registrar.presence_path()).unwrap();
    assert_eq!(entry.ephemeral_owner, Some(harness.node("a").unwrap().session.id()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_leader_observes_joining_node() {
    init_test_logging();

    let config = HarnessConfig::default();
    let interval = config.watchdog_interval;
    let mut harness = ClusterHarness::new(config);
    harness.start_node("a").unwrap();
    harness.wait_for_leader(SETTLE).await.unwrap();

    let (_id, mut events) = harness
        .node("a")
        .unwrap()
        .handle
        .notifications()
        .subscribe(NotificationFilter::Host("b".to_string()))
        .await
        .unwrap();

    // Let a's watchdog record the initial membership first.
    tokio::time::sleep(interval * 2).await;
    harness.start_node("b").unwrap();

    let joined = timeout(SETTLE, async {
        loop {
            match events.recv().await {
                Some(LeaderNotification::Topology(TopologyChange::NodeJoined {
                    hostname, ..
                })) => break hostname,
                Some(_) => continue,
                None => panic!("notification bus closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(joined, "b");

    harness.shutdown().await;
}

#[tokio::test]
async fn test_graceful_stop_removes_presence() {
    init_test_logging();

    let mut harness = ClusterHarness::new(HarnessConfig::default());
    harness.start_nodes(&["a", "b"]).unwrap();
    harness.wait_for_leader(SETTLE).await.unwrap();
    assert!(
        wait_until(SETTLE, || std::future::ready(harness.registered_members().len() == 2)).await
    );

    let outcome = harness.stop_node("b").await.unwrap();
    assert!(outcome.is_ok());
    assert_eq!(harness.registered_members(), vec!["a".to_string()]);

    harness.shutdown().await;
}
