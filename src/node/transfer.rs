use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::server::KvNode;
use crate::protocol::{
    ControlMessage, END_TRANSFER, LineConnection, MIGRATION_HELLO, Request, UNAUTHORISED,
    connect_node,
};
use crate::ring::{NodeEntry, NodeId, hash_key};
use crate::storage::KvStore;

impl KvNode {
    /// Source side of a hand-off, entered when a peer opens a stream with `this is <id>`.
    ///
    /// The peer is served only if it is the destination of the pending `invoke transfer
    /// to`. Keys in the destination's range are streamed under the write-lock and deleted
    /// locally once the peer echoes the end marker.
    pub(crate) async fn serve_migration(
        self: Arc<Self>,
        mut conn: LineConnection,
        claimed: &str,
    ) -> Result<()> {
        let Ok(claimed) = claimed.parse::<NodeId>() else {
            warn!(%claimed, "Unauthorised transfer request");
            conn.write_line(UNAUTHORISED).await?;
            return Ok(());
        };

        let Some(target) = self.await_transfer_target(&claimed).await else {
            warn!(%claimed, "Unauthorised transfer request, no matching instruction");
            conn.write_line(UNAUTHORISED).await?;
            return Ok(());
        };
        self.transfer_target.send_replace(None);

        info!(target = %target.id, "Prepare to transfer data");
        let _write_lock = self.lock_writes().await;

        let moving: Vec<(String, String)> = self
            .primary
            .snapshot()
            .into_iter()
            .filter(|(key, _)| target.range.contains(hash_key(key)))
            .collect();

        for (key, value) in &moving {
            debug!(%key, "Transferring key");
            let record = Request::Put {
                key: key.clone(),
                value: value.clone(),
            };
            conn.write_line(&record.to_string()).await?;
        }
        conn.write_line(END_TRANSFER).await?;

        match conn.read_line().await? {
            Some(echo) if echo == END_TRANSFER => {
                for (key, _) in &moving {
                    self.primary.delete(key);
                }
                info!(
                    target = %target.id,
                    keys = moving.len(),
                    "Data transfer finished, confirming to coordinator"
                );
                self.send_control(&ControlMessage::ConfirmTransfer);
            }
            other => {
                warn!(
                    target = %target.id,
                    reply = ?other,
                    "Destination did not confirm the transfer, keeping data"
                );
            }
        }

        Ok(())
    }

    /// Waits (bounded) for an `invoke transfer to` naming `claimed`. The coordinator
    /// instructs the receiver first, so its stream may arrive before the instruction.
    async fn await_transfer_target(&self, claimed: &NodeId) -> Option<NodeEntry> {
        let mut rx = self.transfer_target.subscribe();

        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(target) = current
                    && target.id == *claimed
                {
                    return Some(target);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        tokio::time::timeout(self.config.transfer_wait_timeout, wait)
            .await
            .ok()
            .flatten()
    }

    /// Destination side of a hand-off: connects to the source, identifies itself and
    /// applies every streamed `put` to the primary store. Returns whether the end
    /// marker arrived.
    pub(crate) async fn receive_from(&self, source: &NodeEntry) -> Result<bool> {
        let mut conn = match connect_node(source.id.addr()).await {
            Ok(conn) => conn,
            Err(e) => {
                info!(source = %source.id, "Unable to connect to source, trying again: {}", e);
                tokio::time::sleep(self.config.receive_connect_retry).await;
                connect_node(source.id.addr()).await?
            }
        };

        conn.write_line(&format!("{} {}", MIGRATION_HELLO, self.id()))
            .await?;

        let mut received = 0usize;
        while let Some(line) = conn.read_line().await? {
            if line == END_TRANSFER {
                conn.write_line(END_TRANSFER).await?;
                info!(source = %source.id, keys = received, "Transfer success");
                return Ok(true);
            }

            match Request::parse(&line) {
                Ok(Request::Put { key, value }) => match self.primary.put(&key, &value) {
                    Ok(_) => received += 1,
                    Err(e) => warn!(%key, "Unable to store transferred key: {}", e),
                },
                _ => warn!(%line, "Received wrong put format"),
            }
        }

        Ok(false)
    }
}
