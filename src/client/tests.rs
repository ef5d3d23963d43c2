//! Client Module Tests
//!
//! ## Test Scopes
//! - **Outcomes**: Typed results for put/get/delete against a live node.
//! - **Redirects**: Stale metadata repaired from `server_not_responsible`.
//! - **Backoff**: Delay growth and jitter bounds; write-locked nodes retried until released
//!   or attempts run out.
//! - **Failover**: Unreachable nodes evicted, `NoServerAlive` when nothing answers.
//!
//! Nodes run their client listener only; metadata is installed directly.

#[cfg(test)]
mod tests {
    use crate::client::{DeleteOutcome, GetOutcome, KvClient, PutOutcome};
    use crate::config::{ClientConfig, NodeConfig};
    use crate::error::ClientError;
    use crate::node::KvNode;
    use crate::ring::{KeyRange, MAX_HASH, Metadata, NodeEntry, NodeId, ReplicaSet, hash_key};
    use crate::storage::KvStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn listening_node() -> Arc<KvNode> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let id = NodeId(listener.local_addr().unwrap());
        let config = NodeConfig::test_config(id.addr(), "127.0.0.1:1".parse().unwrap());
        let node = KvNode::new(config, id);
        tokio::spawn(node.clone().accept_loop(listener));
        node
    }

    /// An address nothing listens on.
    async fn dead_address() -> NodeId {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let id = NodeId(listener.local_addr().unwrap());
        drop(listener);
        id
    }

    fn split_metadata(low: NodeId, high: NodeId) -> Metadata {
        let split = hash_key("foo");
        Metadata::new(vec![
            NodeEntry {
                id: low,
                range: KeyRange::new(0, split),
            },
            NodeEntry {
                id: high,
                range: KeyRange::new(split + 1, MAX_HASH),
            },
        ])
    }

    fn key_above_foo() -> String {
        let split = hash_key("foo");
        (0..)
            .map(|i| format!("key-{}", i))
            .find(|key| hash_key(key) > split)
            .unwrap()
    }

    // ============================================================================
    // Outcomes
    // ============================================================================

    #[tokio::test]
    async fn test_put_get_delete_outcomes() {
        // ARRANGE
        let node = listening_node().await;
        node.apply_metadata(Metadata::new(vec![NodeEntry::new(node.id())]))
            .await;
        let mut client = KvClient::new(node.id().addr(), ClientConfig::test_config());

        // ACT / ASSERT
        assert_eq!(client.put("foo", "bar").await.unwrap(), PutOutcome::Created);
        assert_eq!(client.put("foo", "baz").await.unwrap(), PutOutcome::Updated);
        assert_eq!(
            client.get("foo").await.unwrap(),
            GetOutcome::Found("baz".to_string())
        );
        assert_eq!(client.delete("foo").await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(client.delete("foo").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(client.get("foo").await.unwrap(), GetOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_first_read_caches_replica_set() {
        let node = listening_node().await;
        node.apply_metadata(Metadata::new(vec![NodeEntry::new(node.id())]))
            .await;
        let mut client = KvClient::new(node.id().addr(), ClientConfig::test_config());

        client.get("anything").await.unwrap();

        let cached = client.cached_replicas(&node.id()).unwrap();
        assert_eq!(cached.primary().map(|entry| entry.id), Some(node.id()));
        assert_eq!(cached.len(), 1);
    }

    // ============================================================================
    // Redirects
    // ============================================================================

    #[tokio::test]
    async fn test_not_responsible_refreshes_metadata_and_retries() {
        // ARRANGE
        let low = listening_node().await;
        let high = listening_node().await;
        let metadata = split_metadata(low.id(), high.id());
        low.apply_metadata(metadata.clone()).await;
        high.apply_metadata(metadata.clone()).await;
        let key = key_above_foo();
        high.primary().put(&key, "remote").unwrap();

        // Seeded with `low` only, so the first attempt is misrouted.
        let mut client = KvClient::new(low.id().addr(), ClientConfig::test_config());

        // ACT
        let outcome = client.get(&key).await.unwrap();

        // ASSERT
        assert_eq!(outcome, GetOutcome::Found("remote".to_string()));
        assert_eq!(client.metadata(), &metadata);
    }

    #[tokio::test]
    async fn test_keyrange_replaces_cached_metadata() {
        let low = listening_node().await;
        let high = listening_node().await;
        let metadata = split_metadata(low.id(), high.id());
        low.apply_metadata(metadata.clone()).await;

        let mut client = KvClient::new(low.id().addr(), ClientConfig::test_config());
        let fetched = client.keyrange().await.unwrap();

        assert_eq!(fetched, metadata);
        assert_eq!(client.metadata().len(), 2);
    }

    // ============================================================================
    // Backoff
    // ============================================================================

    #[test]
    fn test_backoff_grows_geometrically_within_jitter() {
        let config = ClientConfig {
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(10),
            ..ClientConfig::test_config()
        };

        for attempt in 0..5u32 {
            let expected = 100u64 * 2u64.pow(attempt);
            for _ in 0..50 {
                let delay = config.backoff(attempt).as_millis() as u64;
                assert!(
                    (expected - 10..=expected + 10).contains(&delay),
                    "attempt {} delay {}ms outside {}±10ms",
                    attempt,
                    delay,
                    expected
                );
            }
            assert!(config.backoff(attempt + 1) > config.backoff(attempt));
        }
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let config = ClientConfig {
            backoff_base: Duration::from_millis(40),
            backoff_multiplier: 1.5,
            jitter: Duration::ZERO,
            ..ClientConfig::test_config()
        };

        assert_eq!(config.backoff(0), Duration::from_millis(40));
        assert_eq!(config.backoff(1), Duration::from_millis(60));
        assert_eq!(config.backoff(2), Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_write_lock_is_retried_until_released() {
        // ARRANGE
        let node = listening_node().await;
        node.apply_metadata(Metadata::new(vec![NodeEntry::new(node.id())]))
            .await;
        let guard = node.lock_writes().await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            drop(guard);
        });
        let mut client = KvClient::new(node.id().addr(), ClientConfig::test_config());

        // ACT
        let outcome = client.put("k", "v").await.unwrap();

        // ASSERT
        assert_eq!(outcome, PutOutcome::Created);
        assert_eq!(node.primary().get("k").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_stopped_node_exhausts_retries() {
        // No metadata installed: the node answers `server_stopped` forever.
        let node = listening_node().await;
        let config = ClientConfig {
            max_attempts: 3,
            ..ClientConfig::test_config()
        };
        let mut client = KvClient::new(node.id().addr(), config);

        let err = client.put("k", "v").await.unwrap_err();

        assert!(matches!(err, ClientError::RetriesExhausted { attempts: 3 }));
        assert!(node.primary().is_empty());
    }

    // ============================================================================
    // Failover
    // ============================================================================

    #[tokio::test]
    async fn test_dead_node_is_evicted_and_live_node_answers() {
        // ARRANGE
        let live = listening_node().await;
        let dead = dead_address().await;
        live.apply_metadata(Metadata::new(vec![NodeEntry::new(live.id())]))
            .await;
        live.primary().put("foo", "bar").unwrap();

        // The cached map still routes "foo" to the dead node.
        let stale = split_metadata(dead, live.id());
        let mut client = KvClient::with_metadata(stale, ClientConfig::test_config());

        // ACT
        let outcome = client.get("foo").await.unwrap();

        // ASSERT
        assert_eq!(outcome, GetOutcome::Found("bar".to_string()));
        assert!(!client.metadata().contains(&dead));
    }

    #[tokio::test]
    async fn test_no_reachable_node_reports_no_server_alive() {
        let dead = dead_address().await;
        let mut client = KvClient::new(dead.addr(), ClientConfig::test_config());

        let err = client.get("foo").await.unwrap_err();

        assert!(matches!(err, ClientError::NoServerAlive));
    }

    #[tokio::test]
    async fn test_reads_may_be_served_by_replica() {
        // ARRANGE
        let primary = listening_node().await;
        let replica = listening_node().await;
        let metadata = split_metadata(primary.id(), replica.id());
        primary.apply_metadata(metadata.clone()).await;
        replica.apply_metadata(metadata.clone()).await;
        primary
            .apply_replica_set(ReplicaSet::new(metadata.entries.clone()))
            .await;
        primary.primary().put("foo", "bar").unwrap();
        replica.replica.put("foo", "bar").unwrap();
        replica.replica_sources.insert(primary.id());

        let mut client = KvClient::with_metadata(metadata, ClientConfig::test_config());

        // ACT / ASSERT
        for _ in 0..10 {
            assert_eq!(
                client.get("foo").await.unwrap(),
                GetOutcome::Found("bar".to_string())
            );
        }
        assert_eq!(client.cached_replicas(&primary.id()).unwrap().len(), 2);
    }
}
