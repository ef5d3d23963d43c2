use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::service::Coordinator;
use super::types::MemberState;
use crate::protocol::ControlMessage;
use crate::ring::{HashRing, NodeId, ReplicaSet};

/// Computes every node's replica set: the node itself followed by the next
/// `replication_factor` nodes in hash order, wrapping past the maximum hash.
///
/// With `replication_factor` or fewer nodes each set holds only its own node.
pub fn compute_replica_plan(
    ring: &HashRing,
    replication_factor: usize,
) -> HashMap<NodeId, ReplicaSet> {
    let mut plan = HashMap::new();

    if ring.size() <= replication_factor {
        for (_, entry) in ring.iter() {
            plan.insert(entry.id, ReplicaSet::single(entry.clone()));
        }
        return plan;
    }

    for (hash, primary) in ring.iter() {
        let mut members = vec![primary.clone()];
        let mut cursor = *hash;

        for _ in 0..replication_factor {
            let Some(next) = ring.next_hash_wrapping(cursor) else {
                break;
            };
            if let Some(entry) = ring.get_by_hash(next) {
                members.push(entry.clone());
            }
            cursor = next;
        }

        plan.insert(primary.id, ReplicaSet::new(members));
    }

    plan
}

impl Coordinator {
    pub(crate) async fn replication_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.planner_interval);
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = interval.tick() => self.publish_replica_plan().await,
                _ = shutdown.changed() => {
                    info!("Replication planner stopping");
                    break;
                }
            }
        }
    }

    /// Sends each active node its current replica set. Nodes without a computed set
    /// (still joining) are skipped.
    pub(crate) async fn publish_replica_plan(&self) {
        let ring = self.ring.lock().await;
        if ring.is_empty() {
            return;
        }

        let plan = compute_replica_plan(&ring, self.config.replication_factor);
        debug!(nodes = ring.size(), "Publishing replica plan");

        for member in self.members.iter() {
            if member.state != MemberState::Active {
                continue;
            }
            let Some(node) = member.node else {
                continue;
            };
            match plan.get(&node) {
                Some(set) => {
                    member.send(&ControlMessage::ReplicaUpdate(set.clone()));
                }
                None => debug!(%node, "No replica set yet, skipping"),
            }
        }
    }
}
