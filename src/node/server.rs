use anyhow::{Result, bail};
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::types::{WriteLock, WriteLockGuard};
use crate::config::NodeConfig;
use crate::protocol::{
    ControlMessage, LineConnection, MIGRATION_HELLO, REPLICA_HELLO, Request, node_welcome,
};
use crate::ring::{Metadata, NodeEntry, NodeId, ReplicaSet};
use crate::storage::MemoryStore;

/// A storage node: serves clients on its listen address, follows the coordinator's
/// instructions and pushes its mutations to its replicas.
pub struct KvNode {
    pub(crate) config: NodeConfig,
    id: NodeId,
    pub(crate) primary: MemoryStore,
    /// Keys pushed to this node by primaries it replicates.
    pub(crate) replica: MemoryStore,
    pub(crate) metadata: RwLock<Option<Metadata>>,
    pub(crate) replicas: RwLock<Option<ReplicaSet>>,
    pub(crate) write_lock: WriteLock,
    /// Mutations applied since the last broadcast to replicas, in order.
    pub(crate) journal: Mutex<Vec<Request>>,
    pub(crate) resync: AtomicBool,
    /// Destination of the pending `invoke transfer to`, if any.
    pub(crate) transfer_target: watch::Sender<Option<NodeEntry>>,
    pub(crate) replica_sources: DashSet<NodeId>,
    pub(crate) control: OnceLock<mpsc::UnboundedSender<String>>,
    shutdown: watch::Sender<bool>,
}

impl KvNode {
    pub fn new(config: NodeConfig, id: NodeId) -> Arc<Self> {
        let (transfer_target, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            id,
            primary: MemoryStore::new(),
            replica: MemoryStore::new(),
            metadata: RwLock::new(None),
            replicas: RwLock::new(None),
            write_lock: WriteLock::new(),
            journal: Mutex::new(Vec::new()),
            resync: AtomicBool::new(false),
            transfer_target,
            replica_sources: DashSet::new(),
            control: OnceLock::new(),
            shutdown,
        })
    }

    /// Binds the client listener, registers with the coordinator and starts every
    /// background task. The node's identity is the bound address.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>> {
        // The coordinator knows nodes by the address it sees them connect from.
        if config.listen.ip().is_unspecified() {
            bail!(
                "listen address {} is unspecified, bind a concrete interface",
                config.listen
            );
        }
        let listener = TcpListener::bind(config.listen).await?;
        let id = NodeId(listener.local_addr()?);
        info!("Starting node {} (coordinator {})", id, config.bootstrap);

        let node = Self::new(config, id);
        node.clone().run(listener).await?;
        Ok(node)
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let control = LineConnection::connect(self.config.bootstrap).await?;
        info!("Connected to coordinator at {}", self.config.bootstrap);

        let _control_handle = {
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.control_loop(control).await {
                    error!("Coordinator connection failed: {}", e);
                }
            })
        };

        let _accept_handle = {
            let node = self.clone();
            tokio::spawn(async move {
                node.accept_loop(listener).await;
            })
        };

        let _replication_handle = {
            let node = self.clone();
            tokio::spawn(async move {
                node.replication_loop().await;
            })
        };

        info!("All node tasks started");
        Ok(())
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn primary(&self) -> &MemoryStore {
        &self.primary
    }

    pub async fn metadata(&self) -> Option<Metadata> {
        self.metadata.read().await.clone()
    }

    pub async fn own_entry(&self) -> Option<NodeEntry> {
        self.metadata
            .read()
            .await
            .as_ref()
            .and_then(|metadata| metadata.find(&self.id).cloned())
    }

    pub async fn replica_set(&self) -> Option<ReplicaSet> {
        self.replicas.read().await.clone()
    }

    pub fn is_write_locked(&self) -> bool {
        self.write_lock.is_locked()
    }

    /// Rejects new client writes and waits for the ones in progress to finish.
    pub async fn lock_writes(&self) -> WriteLockGuard {
        self.write_lock.acquire().await
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stops the accept loop and background tasks without telling the coordinator.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Resolves once the node has been stopped.
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_signal();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Graceful leave: asks the coordinator to remove this node and waits for the
    /// `shutdown` that follows the hand-off of its data.
    pub async fn leave(&self, timeout: Duration) -> Result<()> {
        let Some(control) = self.control.get() else {
            bail!("node is not connected to a coordinator");
        };

        info!("Initiating shutdown sequence");
        control.send(ControlMessage::Remove(self.id.addr().port()).to_string())?;

        if tokio::time::timeout(timeout, self.stopped()).await.is_err() {
            warn!("Coordinator did not confirm removal in {:?}", timeout);
            self.stop();
        }
        Ok(())
    }

    pub(crate) fn send_control(&self, msg: &ControlMessage) {
        match self.control.get() {
            Some(control) => {
                if control.send(msg.to_string()).is_err() {
                    warn!("Coordinator connection closed, dropping {}", msg);
                }
            }
            None => warn!("No coordinator connection, dropping {}", msg),
        }
    }

    pub(crate) async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_signal();
        info!("Node {} entering main loop", self.id);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Node {} stopped accepting connections", self.id);
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_connection(stream).await {
                                debug!("Connection {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    /// Routes a connection by its first line: a migration stream, a replica stream, or
    /// client traffic.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        let mut conn = LineConnection::new(stream)?;
        debug!("Connection established: {}", conn.peer_addr());
        conn.write_line(&node_welcome(self.id)).await?;

        let Some(first) = conn.read_line().await? else {
            return Ok(());
        };

        if let Some(claimed) = first.strip_prefix(MIGRATION_HELLO) {
            return self.serve_migration(conn, claimed.trim()).await;
        }
        if let Some(claimed) = first.strip_prefix(REPLICA_HELLO) {
            return self.serve_replica_stream(conn, claimed.trim()).await;
        }

        let mut line = first;
        loop {
            let response = self.process_line(&line).await;
            conn.write_line(&response.to_string()).await?;

            match conn.read_line().await? {
                Some(next) if !self.is_stopped() => line = next,
                _ => break,
            }
        }

        debug!("Closed client connection {}", conn.peer_addr());
        Ok(())
    }

    pub(crate) fn set_resync(&self) {
        self.resync.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_resync(&self) -> bool {
        self.resync.swap(false, Ordering::SeqCst)
    }
}
