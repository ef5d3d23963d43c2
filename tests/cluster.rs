//! Cluster Integration Tests
//!
//! ## Test Scopes
//! - **End-to-end**: A coordinator, two nodes and raw client lines.
//! - **Hand-off**: Keys follow their range on join and on graceful leave.
//! - **Replication**: Replica plans reach the nodes and writes reach the replicas.
//! - **Failover**: The client router survives a node removed by the failure detector.
//!
//! Everything runs in-process on `127.0.0.1:0` with `test_config()` timings.

use ringkv::client::{GetOutcome, KvClient, PutOutcome};
use ringkv::config::{ClientConfig, EcsConfig, NodeConfig};
use ringkv::ecs::{Coordinator, MemberState};
use ringkv::node::KvNode;
use ringkv::protocol::connect_node;
use ringkv::ring::{HashRing, KeyRange, NodeId};
use ringkv::storage::KvStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_coordinator(config: EcsConfig) -> (Arc<Coordinator>, SocketAddr) {
    let coordinator = Coordinator::new(config);
    let addr = coordinator.clone().start().await.unwrap();
    (coordinator, addr)
}

async fn start_node(ecs: SocketAddr) -> Arc<KvNode> {
    let config = NodeConfig::test_config("127.0.0.1:0".parse().unwrap(), ecs);
    let node = KvNode::start(config).await.unwrap();
    wait_until_joined(&node).await;
    node
}

/// Starts a node on a listener chosen so that `accept(id)` holds.
async fn start_node_where(ecs: SocketAddr, accept: impl Fn(NodeId) -> bool) -> Arc<KvNode> {
    for _ in 0..500 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let id = NodeId(listener.local_addr().unwrap());
        if !accept(id) {
            continue;
        }

        let node = KvNode::new(NodeConfig::test_config(id.addr(), ecs), id);
        node.clone().run(listener).await.unwrap();
        wait_until_joined(&node).await;
        return node;
    }
    panic!("no suitable port found");
}

async fn wait_until_joined(node: &KvNode) {
    eventually("node to receive its range", async || {
        node.own_entry().await.is_some()
    })
    .await;
}

async fn eventually(what: &str, check: impl AsyncFn() -> bool) {
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn raw_request(node: &KvNode, line: &str) -> String {
    let mut conn = connect_node(node.id().addr()).await.unwrap();
    conn.request(line).await.unwrap()
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_to_end_split_keeps_foo_on_first_node() {
    // ARRANGE
    let (_coordinator, ecs) = start_coordinator(EcsConfig::test_config()).await;
    let a = start_node(ecs).await;
    assert_eq!(a.own_entry().await.unwrap().range, KeyRange::FULL);

    assert_eq!(raw_request(&a, "put foo bar").await, "put_success foo");

    // ACT
    let a_id = a.id();
    let b = start_node_where(ecs, |candidate| {
        let mut ring = HashRing::new();
        ring.join(a_id);
        ring.join(candidate);
        ring.get(&a_id).is_some_and(|entry| entry.is_responsible("foo"))
    })
    .await;
    eventually("first node to see the split", async || {
        a.metadata().await.is_some_and(|m| m.len() == 2)
    })
    .await;

    // ASSERT
    assert_eq!(raw_request(&b, "get foo").await, "server_not_responsible");
    assert_eq!(raw_request(&a, "get foo").await, "get_success foo bar");
}

// ============================================================================
// Hand-off
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_moves_every_key_in_new_range() {
    // ARRANGE
    let (coordinator, ecs) = start_coordinator(EcsConfig::test_config()).await;
    let a = start_node(ecs).await;
    let mut client = KvClient::new(a.id().addr(), ClientConfig::test_config());
    let keys: Vec<String> = (0..50).map(|i| format!("key-{}", i)).collect();
    for key in &keys {
        assert_eq!(client.put(key, "v").await.unwrap(), PutOutcome::Created);
    }

    // ACT
    let b = start_node(ecs).await;
    eventually("joined node to become active", async || {
        coordinator.member_state(&b.id()) == Some(MemberState::Active)
    })
    .await;

    // ASSERT
    let b_entry = b.own_entry().await.unwrap();
    for key in &keys {
        let on_b = b_entry.is_responsible(key);
        assert_eq!(b.primary().get(key).is_some(), on_b, "key {} on new node", key);
        assert_eq!(a.primary().get(key).is_some(), !on_b, "key {} on old node", key);
    }
    assert_eq!(a.primary().len() + b.primary().len(), keys.len());

    for key in &keys {
        assert_eq!(
            client.get(key).await.unwrap(),
            GetOutcome::Found("v".to_string())
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_leave_hands_data_to_remaining_node() {
    // ARRANGE
    let (coordinator, ecs) = start_coordinator(EcsConfig::test_config()).await;
    let a = start_node(ecs).await;
    let b = start_node(ecs).await;
    eventually("ring of two", async || coordinator.ring_snapshot().await.len() == 2).await;

    let mut client = KvClient::new(a.id().addr(), ClientConfig::test_config());
    let keys: Vec<String> = (0..30).map(|i| format!("city-{}", i)).collect();
    for key in &keys {
        client.put(key, "here").await.unwrap();
    }

    // ACT
    b.leave(Duration::from_secs(5)).await.unwrap();

    // ASSERT
    assert!(b.is_stopped());
    eventually("ring of one", async || coordinator.ring_snapshot().await.len() == 1).await;
    assert_eq!(a.primary().len(), keys.len());
    for key in &keys {
        assert_eq!(
            client.get(key).await.unwrap(),
            GetOutcome::Found("here".to_string())
        );
    }
}

// ============================================================================
// Replication
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_replica_plan_delivered_and_writes_replicated() {
    // ARRANGE
    let config = EcsConfig {
        replication_factor: 1,
        ..EcsConfig::test_config()
    };
    let (_coordinator, ecs) = start_coordinator(config).await;
    let a = start_node(ecs).await;
    let b = start_node(ecs).await;

    eventually("replica plans", async || {
        let a_set = a.replica_set().await;
        let b_set = b.replica_set().await;
        a_set.is_some_and(|s| s.len() == 2) && b_set.is_some_and(|s| s.len() == 2)
    })
    .await;
    let a_set = a.replica_set().await.unwrap();
    assert_eq!(a_set.primary().map(|e| e.id), Some(a.id()));
    assert_eq!(a_set.peers()[0].id, b.id());

    // ACT
    let key = (0..)
        .map(|i| format!("replicated-{}", i))
        .find(|key| {
            a_set
                .primary()
                .is_some_and(|entry| entry.is_responsible(key))
        })
        .unwrap();
    let mut client = KvClient::new(a.id().addr(), ClientConfig::test_config());
    client.put(&key, "copy").await.unwrap();

    // ASSERT
    let expected = format!("get_success {} copy", key);
    eventually("replica to serve the key", async || {
        b.process_line(&format!("get {}", key)).await.to_string() == expected
    })
    .await;
    assert!(b.primary().get(&key).is_none());
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_recovers_after_forced_removal() {
    // ARRANGE
    let (coordinator, ecs) = start_coordinator(EcsConfig::test_config()).await;
    let a = start_node(ecs).await;
    let b = start_node(ecs).await;
    eventually("ring of two", async || coordinator.ring_snapshot().await.len() == 2).await;

    let mut client = KvClient::new(a.id().addr(), ClientConfig::test_config());
    client.keyrange().await.unwrap();
    let b_entry = b.own_entry().await.unwrap();
    let key = (0..)
        .map(|i| format!("doomed-{}", i))
        .find(|key| b_entry.is_responsible(key))
        .unwrap();
    client.put(&key, "lost").await.unwrap();

    // ACT
    b.stop();
    eventually("failure detector to drop the node", async || {
        coordinator.ring_snapshot().await.len() == 1
    })
    .await;
    let outcome = client.get(&key).await;

    // ASSERT
    assert!(outcome.is_ok(), "get failed: {:?}", outcome);
    assert!(!client.metadata().contains(&b.id()));
    assert_eq!(client.put(&key, "again").await.unwrap(), PutOutcome::Created);
    assert!(a.primary().get(&key).is_some());
}
