use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::server::KvNode;
use crate::protocol::{
    LineConnection, REPLICA_HELLO, Request, UNAUTHORISED, connect_node, spawn_writer,
};
use crate::ring::{NodeEntry, NodeId, hash_key};
use crate::storage::KvStore;

/// An open push stream to one replica.
struct ReplicaStream {
    peer: NodeId,
    tx: mpsc::UnboundedSender<String>,
    /// Set once the replica closed the stream or refused it.
    closed: Arc<AtomicBool>,
}

impl KvNode {
    /// Pushes this node's mutations to its replicas every `push_interval`.
    ///
    /// A changed replica set reopens every stream and pushes a full snapshot under the
    /// write-lock; otherwise only the journal accumulated since the last tick is sent.
    pub(crate) async fn replication_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.push_interval);
        let mut shutdown = self.shutdown_signal();
        let mut streams: Vec<ReplicaStream> = Vec::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.take_resync() {
                        // Replicas must see the old stream end before the new one starts.
                        streams.clear();
                        streams = self.resync().await;
                    } else {
                        self.push_journal(&mut streams).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Replication pusher stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Opens a stream to every peer of the current replica set and sends each the full
    /// primary store. Client writes are rejected until the snapshot is queued.
    async fn resync(&self) -> Vec<ReplicaStream> {
        let Some(set) = self.replica_set().await else {
            self.journal.lock().await.clear();
            return Vec::new();
        };

        let _write_lock = self.lock_writes().await;
        self.journal.lock().await.clear();
        let snapshot = self.primary.snapshot();

        let mut streams = Vec::with_capacity(set.peers().len());
        for peer in set.peers() {
            let Some((tx, closed)) = self.open_replica_stream(peer).await else {
                continue;
            };

            for (key, value) in &snapshot {
                let record = Request::Put {
                    key: key.clone(),
                    value: value.clone(),
                };
                if tx.send(record.to_string()).is_err() {
                    break;
                }
            }

            info!(peer = %peer.id, keys = snapshot.len(), "Replica resynchronised");
            streams.push(ReplicaStream {
                peer: peer.id,
                tx,
                closed,
            });
        }

        streams
    }

    async fn push_journal(&self, streams: &mut Vec<ReplicaStream>) {
        let open = streams.len();
        streams.retain(|stream| {
            let closed = stream.closed.load(Ordering::SeqCst);
            if closed {
                warn!(peer = %stream.peer, "Replica stream closed");
            }
            !closed
        });
        let mut broken = streams.len() != open;

        let pending = std::mem::take(&mut *self.journal.lock().await);
        if !pending.is_empty() && !streams.is_empty() {
            debug!(
                records = pending.len(),
                replicas = streams.len(),
                "Pushing journal"
            );

            streams.retain(|stream| {
                let delivered = pending
                    .iter()
                    .all(|record| stream.tx.send(record.to_string()).is_ok());
                if !delivered {
                    warn!(peer = %stream.peer, "Replica writer stopped");
                    broken = true;
                }
                delivered
            });
        }

        if broken {
            self.set_resync();
        }
    }

    /// Connects to a replica with capped exponential backoff. Gives up once the peer
    /// disappears from the metadata or the node stops.
    async fn open_replica_stream(
        &self,
        peer: &NodeEntry,
    ) -> Option<(mpsc::UnboundedSender<String>, Arc<AtomicBool>)> {
        let mut backoff = self.config.replica_backoff_start;

        loop {
            if self.is_stopped() {
                return None;
            }

            match connect_node(peer.id.addr()).await {
                Ok(mut conn) => {
                    let hello = format!("{} {}", REPLICA_HELLO, self.id());
                    if let Err(e) = conn.write_line(&hello).await {
                        warn!(peer = %peer.id, "Replica handshake failed: {}", e);
                    } else {
                        return Some(Self::spawn_replica_stream(peer.id, conn));
                    }
                }
                Err(e) => debug!(peer = %peer.id, "Replica unreachable: {}", e),
            }

            let still_member = self
                .metadata()
                .await
                .is_some_and(|metadata| metadata.contains(&peer.id));
            if !still_member {
                info!(peer = %peer.id, "Replica left the ring, not retrying");
                return None;
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.replica_backoff_cap);
        }
    }

    fn spawn_replica_stream(
        peer: NodeId,
        conn: LineConnection,
    ) -> (mpsc::UnboundedSender<String>, Arc<AtomicBool>) {
        let (mut reader, writer) = conn.into_split();
        let closed = Arc::new(AtomicBool::new(false));

        let flag = closed.clone();
        tokio::spawn(async move {
            while let Ok(Some(line)) = reader.read_line().await {
                warn!(%peer, %line, "Replica answered on push stream");
            }
            flag.store(true, Ordering::SeqCst);
        });

        (spawn_writer(writer), closed)
    }

    /// Replica side of a push stream: applies the primary's mutations to the replica
    /// store until the stream closes.
    pub(crate) async fn serve_replica_stream(
        self: Arc<Self>,
        mut conn: LineConnection,
        claimed: &str,
    ) -> Result<()> {
        let metadata = self.metadata().await;
        let source = claimed.parse::<NodeId>().ok().and_then(|id| {
            metadata
                .as_ref()
                .and_then(|metadata| metadata.find(&id).cloned())
        });

        let Some(source) = source else {
            warn!(%claimed, "Unauthorised replica stream");
            conn.write_line(UNAUTHORISED).await?;
            return Ok(());
        };

        // A fresh stream always starts with a full snapshot of the source's range.
        for (key, _) in self.replica.snapshot() {
            if source.range.contains(hash_key(&key)) {
                self.replica.delete(&key);
            }
        }
        self.replica_sources.insert(source.id);
        info!(source = %source.id, "Accepted replica stream");

        while let Some(line) = conn.read_line().await? {
            match Request::parse(&line) {
                Ok(Request::Put { key, value }) => {
                    if let Err(e) = self.replica.put(&key, &value) {
                        warn!(%key, "Unable to store replica key: {}", e);
                    }
                }
                Ok(Request::Delete { key }) => {
                    self.replica.delete(&key);
                }
                _ => warn!(%line, "Ignoring malformed replica record"),
            }
        }

        debug!(source = %source.id, "Replica stream closed");
        Ok(())
    }
}
