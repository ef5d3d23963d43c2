use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::service::Coordinator;
use super::types::ConnectionId;
use crate::ring::NodeId;

impl Coordinator {
    /// Starts the reachability probe for a node that announced its client port.
    ///
    /// Each member gets its own task on its own schedule; a node already probed keeps
    /// its existing task (a rolled-back join re-sends `add`).
    pub(crate) fn watch_member(self: Arc<Self>, conn: ConnectionId, node: NodeId) {
        if self.probes.contains_key(&conn) {
            return;
        }

        let service = self.clone();
        let handle = tokio::spawn(async move {
            service.probe_loop(conn, node).await;
        });
        self.probes.insert(conn, handle);
    }

    async fn probe_loop(self: Arc<Self>, conn: ConnectionId, node: NodeId) {
        tokio::time::sleep(self.config.probe_initial_delay).await;
        let mut interval = tokio::time::interval(self.config.probe_interval);

        loop {
            interval.tick().await;

            if self.probe(node).await {
                debug!(%node, "Probe succeeded");
                continue;
            }

            warn!(%node, "Node unreachable, removing it");
            // Detach our own handle first so the removal path does not abort this task.
            self.probes.remove(&conn);
            self.remove_failed_member(conn).await;
            return;
        }
    }

    async fn probe(&self, node: NodeId) -> bool {
        matches!(
            tokio::time::timeout(self.config.probe_timeout, TcpStream::connect(node.addr())).await,
            Ok(Ok(_))
        )
    }

    /// Forced removal of a member: closes its connection, stops its probe, takes it off
    /// the ring and broadcasts. No data hand-off is attempted.
    pub(crate) async fn remove_failed_member(&self, conn: ConnectionId) {
        let Some((_, mut member)) = self.members.remove(&conn) else {
            return;
        };
        member.close();
        self.confirmations.remove(&conn);
        if let Some((_, probe)) = self.probes.remove(&conn) {
            probe.abort();
        }

        let Some(node) = member.node else {
            debug!(peer = %member.peer, "Dropped connection that never joined");
            return;
        };

        let mut ring = self.ring.lock().await;
        if ring.get(&node).is_none() {
            debug!(%node, "Failed node was not on the ring");
            return;
        }

        ring.leave(&node);
        info!(%node, nodes = ring.size(), "Removed failed node from the ring");
        self.broadcast_metadata(&ring);
    }
}
