use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::server::KvNode;
use crate::error::ProtocolError;
use crate::protocol::{ControlMessage, LineConnection, spawn_writer};
use crate::ring::{KeyRange, Metadata, ReplicaSet, hash_key};
use crate::storage::KvStore;

impl KvNode {
    /// Processes the coordinator's control lines one at a time until `shutdown`, the
    /// coordinator closes the connection, or an unrecognized line arrives.
    pub(crate) async fn control_loop(self: Arc<Self>, conn: LineConnection) -> Result<()> {
        let (mut reader, writer) = conn.into_split();
        let control = spawn_writer(writer);
        if self.control.set(control).is_err() {
            warn!("Node already had a coordinator connection");
        }

        let mut shutdown = self.shutdown_signal();
        let port = self.id().addr().port();

        loop {
            let line = tokio::select! {
                line = reader.read_line() => line?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Node stopped, closing coordinator connection");
                        return Ok(());
                    }
                    continue;
                }
            };

            let Some(line) = line else {
                error!("Coordinator closed the control connection");
                return Ok(());
            };
            debug!(%line, "Received from coordinator");

            let msg = match line.parse::<ControlMessage>() {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Unrecognized message from coordinator: {}", e);
                    return Err(e.into());
                }
            };

            match msg {
                ControlMessage::Welcome | ControlMessage::TryAgain => {
                    info!("Registering with coordinator");
                    self.send_control(&ControlMessage::Add(port));
                }
                ControlMessage::Update(metadata) => self.apply_metadata(metadata).await,
                ControlMessage::ReplicaUpdate(set) => self.apply_replica_set(set).await,
                ControlMessage::InvokeTransferTo(target) => {
                    info!(target = %target.id, "Begin transfer data process");
                    self.transfer_target.send_replace(Some(target));
                }
                ControlMessage::InvokeReceiveFrom(source) => {
                    match self.receive_from(&source).await {
                        Ok(true) => {
                            info!(source = %source.id, "Sending confirm transfer to the coordinator");
                            self.send_control(&ControlMessage::ConfirmTransfer);
                        }
                        Ok(false) => {
                            warn!(source = %source.id, "Transfer stream ended without end marker");
                        }
                        Err(e) => warn!(source = %source.id, "Receiving data failed: {}", e),
                    }
                }
                ControlMessage::Shutdown => {
                    info!("Coordinator requested shutdown");
                    self.stop();
                    return Ok(());
                }
                other @ (ControlMessage::Add(_)
                | ControlMessage::Remove(_)
                | ControlMessage::ConfirmTransfer) => {
                    error!("Unexpected message from coordinator: {}", other);
                    return Err(ProtocolError::UnknownControl(other.to_string()).into());
                }
            }
        }
    }

    /// Adopts a partition map only if it contains this node.
    pub(crate) async fn apply_metadata(&self, metadata: Metadata) {
        if !metadata.contains(&self.id()) {
            info!("Ignoring metadata that does not include this node yet");
            return;
        }

        self.replica_sources
            .retain(|source| metadata.contains(source));
        self.prune_replica(&metadata);
        info!(nodes = metadata.len(), "Update metadata successfully");
        *self.metadata.write().await = Some(metadata);
    }

    /// Drops replica keys outside the current range of every primary streaming here.
    /// Hand-offs shrink a primary's range without telling its replicas.
    fn prune_replica(&self, metadata: &Metadata) {
        let replicated: Vec<KeyRange> = self
            .replica_sources
            .iter()
            .filter_map(|source| metadata.find(source.key()).map(|entry| entry.range))
            .collect();

        let mut pruned = 0usize;
        for (key, _) in self.replica.snapshot() {
            let hash = hash_key(&key);
            if !replicated.iter().any(|range| range.contains(hash)) {
                self.replica.delete(&key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "Dropped replica keys outside replicated ranges");
        }
    }

    /// Swaps in a new replica set and flags a full resync if it changed.
    pub(crate) async fn apply_replica_set(&self, set: ReplicaSet) {
        let mut replicas = self.replicas.write().await;
        let changed = replicas.as_ref() != Some(&set);
        *replicas = Some(set);

        if changed {
            info!("Replica set changed, scheduling resync");
            self.set_resync();
        }
    }
}
