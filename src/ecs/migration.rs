use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::service::Coordinator;
use super::types::{ConnectionId, MemberState, MigrationKind};
use crate::error::MigrationError;
use crate::protocol::ControlMessage;
use crate::ring::{NodeEntry, NodeId};

impl Coordinator {
    /// Runs a two-phase hand-off of `destination.range` from `source` to `destination`.
    ///
    /// Both completion signals are armed before either node is instructed, and the
    /// receiver is instructed before the sender. The caller holds the ring lock.
    pub(crate) async fn migrate(
        &self,
        source: &NodeEntry,
        destination: &NodeEntry,
        kind: MigrationKind,
    ) -> Result<(), MigrationError> {
        let source_conn = self
            .connection_of(&source.id)
            .ok_or(MigrationError::MemberNotFound(source.id))?;
        let destination_conn = self
            .connection_of(&destination.id)
            .ok_or(MigrationError::MemberNotFound(destination.id))?;

        let previous = self.mark_migrating(&[source_conn, destination_conn]);

        let source_done = self.arm_confirmation(source_conn);
        let destination_done = self.arm_confirmation(destination_conn);

        self.send_to(
            destination_conn,
            &ControlMessage::InvokeReceiveFrom(source.clone()),
        );
        self.send_to(
            source_conn,
            &ControlMessage::InvokeTransferTo(destination.clone()),
        );
        info!(
            from = %source.id,
            to = %destination.id,
            ?kind,
            "Waiting for nodes to finish their data transfer"
        );

        let result = self
            .await_confirmations(
                (source.id, source_done),
                (destination.id, destination_done),
            )
            .await;

        self.confirmations.remove(&source_conn);
        self.confirmations.remove(&destination_conn);
        self.restore_states(previous);

        match &result {
            Ok(()) => info!(from = %source.id, to = %destination.id, "Data transfer executed"),
            Err(e) => warn!(from = %source.id, to = %destination.id, "Data transfer failed: {}", e),
        }
        result
    }

    fn arm_confirmation(&self, conn: ConnectionId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.confirmations.insert(conn, tx);
        rx
    }

    async fn await_confirmations(
        &self,
        (source, source_done): (NodeId, oneshot::Receiver<()>),
        (destination, destination_done): (NodeId, oneshot::Receiver<()>),
    ) -> Result<(), MigrationError> {
        let both = async {
            tokio::try_join!(
                async {
                    source_done
                        .await
                        .map_err(|_| MigrationError::PeerDisconnected(source))
                },
                async {
                    destination_done
                        .await
                        .map_err(|_| MigrationError::PeerDisconnected(destination))
                },
            )
        };
        tokio::pin!(both);

        let attempts = self.config.migration_attempts;
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.migration_poll_interval, &mut both).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => info!(attempt, "Checking transfer state, not done yet"),
            }
        }

        Err(MigrationError::Timeout { attempts })
    }

    fn mark_migrating(&self, conns: &[ConnectionId]) -> HashMap<ConnectionId, MemberState> {
        let mut previous = HashMap::new();
        for conn in conns {
            if let Some(mut member) = self.members.get_mut(conn) {
                previous.insert(*conn, member.state);
                member.state = MemberState::Migrating;
            }
        }
        previous
    }

    fn restore_states(&self, previous: HashMap<ConnectionId, MemberState>) {
        for (conn, state) in previous {
            self.set_state(conn, state);
        }
    }
}
