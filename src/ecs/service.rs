use anyhow::Result;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{ConnectionId, Member, MemberInfo, MemberState, MigrationKind, RingEntryInfo};
use crate::config::EcsConfig;
use crate::protocol::{ControlMessage, LineConnection, spawn_writer};
use crate::ring::{HashRing, NodeId};

/// The coordinator: sole owner of the authoritative ring.
///
/// Every structural change (join, leave, forced removal) runs while holding `ring`,
/// including the data hand-off it triggers, so at most one migration is in flight.
pub struct Coordinator {
    pub(crate) config: EcsConfig,
    pub(crate) ring: Mutex<HashRing>,
    pub(crate) members: DashMap<ConnectionId, Member>,
    /// Armed completion signals of the hand-off in flight, per control connection.
    pub(crate) confirmations: DashMap<ConnectionId, oneshot::Sender<()>>,
    pub(crate) probes: DashMap<ConnectionId, JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Coordinator {
    pub fn new(config: EcsConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            ring: Mutex::new(HashRing::new()),
            members: DashMap::new(),
            confirmations: DashMap::new(),
            probes: DashMap::new(),
            shutdown,
        })
    }

    /// Binds the control listener and starts the background tasks. Returns the bound
    /// control address.
    pub async fn start(self: Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.listen).await?;
        let addr = listener.local_addr()?;
        info!("Coordinator listening on {}", addr);

        let _accept_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.accept_loop(listener).await;
            })
        };

        let _planner_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.replication_loop().await;
            })
        };

        if let Some(admin) = self.config.admin {
            let admin_listener = TcpListener::bind(admin).await?;
            info!("Admin API listening on {}", admin_listener.local_addr()?);
            let router = super::handlers::admin_router(self.clone());
            tokio::spawn(async move {
                if let Err(e) = axum::serve(admin_listener, router).await {
                    error!("Admin server failed: {}", e);
                }
            });
        }

        info!("All coordinator tasks started");
        Ok(addr)
    }

    /// Stops accepting connections and ends the planner.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        for probe in self.probes.iter() {
            probe.value().abort();
        }
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub async fn ring_snapshot(&self) -> Vec<RingEntryInfo> {
        let ring = self.ring.lock().await;
        ring.metadata()
            .entries
            .iter()
            .map(|entry| RingEntryInfo {
                node: entry.id.to_string(),
                range_start: entry.range.start.to_string(),
                range_end: entry.range.end.to_string(),
            })
            .collect()
    }

    pub fn members(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    pub fn member_state(&self, node: &NodeId) -> Option<MemberState> {
        self.members
            .iter()
            .find(|entry| entry.value().node.as_ref() == Some(node))
            .map(|entry| entry.value().state)
    }

    pub(crate) fn connection_of(&self, node: &NodeId) -> Option<ConnectionId> {
        self.members
            .iter()
            .find(|entry| entry.value().node.as_ref() == Some(node))
            .map(|entry| *entry.key())
    }

    pub(crate) fn set_state(&self, conn: ConnectionId, state: MemberState) {
        if let Some(mut member) = self.members.get_mut(&conn) {
            member.state = state;
        }
    }

    pub(crate) fn send_to(&self, conn: ConnectionId, msg: &ControlMessage) -> bool {
        self.members
            .get(&conn)
            .map(|member| member.send(msg))
            .unwrap_or(false)
    }

    /// Sends the current partition map to every control connection.
    pub(crate) fn broadcast_metadata(&self, ring: &HashRing) {
        let msg = ControlMessage::Update(ring.metadata());
        info!(nodes = ring.size(), "Broadcasting metadata update");

        for member in self.members.iter() {
            if !member.send(&msg) {
                warn!("Failed to queue update for {}", member.peer);
            }
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown_signal();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Coordinator accept loop stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let service = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = service.handle_connection(stream, peer).await {
                                warn!("Control connection {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept control connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (mut reader, writer) = LineConnection::new(stream)?.into_split();
        let (close_tx, mut close_rx) = oneshot::channel();

        let member = Member::new(peer, spawn_writer(writer), close_tx);
        let conn = member.conn;
        member.send(&ControlMessage::Welcome);
        self.members.insert(conn, member);
        info!(%peer, connection = %conn, "Node connected");

        loop {
            let line = tokio::select! {
                _ = &mut close_rx => {
                    debug!(connection = %conn, "Control connection closed by coordinator");
                    return Ok(());
                }
                line = reader.read_line() => line,
            };

            match line {
                Ok(Some(line)) => self.clone().handle_line(conn, &line),
                Ok(None) => break,
                Err(e) => {
                    warn!(connection = %conn, "Control read failed: {}", e);
                    break;
                }
            }
        }

        self.handle_disconnect(conn).await;
        Ok(())
    }

    fn handle_line(self: Arc<Self>, conn: ConnectionId, line: &str) {
        debug!(connection = %conn, %line, "Control message received");

        match line.parse::<ControlMessage>() {
            Ok(ControlMessage::Add(port)) => {
                let node = {
                    let Some(mut member) = self.members.get_mut(&conn) else {
                        return;
                    };
                    if member.state != MemberState::Connected {
                        warn!(connection = %conn, "Ignoring add from a node already added");
                        return;
                    }
                    let node = NodeId(SocketAddr::new(member.peer.ip(), port));
                    member.node = Some(node);
                    member.state = MemberState::AddPending;
                    node
                };

                tokio::spawn(async move {
                    self.handle_join(conn, node).await;
                });
            }

            Ok(ControlMessage::ConfirmTransfer) => match self.confirmations.remove(&conn) {
                Some((_, signal)) => {
                    info!(connection = %conn, "Recognized confirm transfer");
                    let _ = signal.send(());
                }
                None => warn!(connection = %conn, "Confirm transfer without a hand-off"),
            },

            Ok(ControlMessage::Remove(_)) => {
                let node = {
                    let Some(member) = self.members.get(&conn) else {
                        return;
                    };
                    match (member.state, member.node) {
                        (MemberState::Active, Some(node)) => node,
                        _ => {
                            warn!(connection = %conn, state = ?member.state, "Ignoring remove");
                            return;
                        }
                    }
                };

                tokio::spawn(async move {
                    self.handle_leave(conn, node).await;
                });
            }

            Ok(other) => {
                warn!(connection = %conn, "Unexpected control message from node: {}", other);
            }

            Err(e) => {
                error!(connection = %conn, "Malformed message from node: {}", e);
            }
        }
    }

    async fn handle_join(self: Arc<Self>, conn: ConnectionId, node: NodeId) {
        let mut ring = self.ring.lock().await;
        if !self.members.contains_key(&conn) {
            debug!(%node, "Node disconnected before its join ran");
            return;
        }
        info!(%node, "Node joining the ring");

        let evicted = ring.join(node);
        self.clone().watch_member(conn, node);

        if let Some(source) = evicted {
            let Some(destination) = ring.get(&node).cloned() else {
                return;
            };
            info!(new = %node, changed = %source.id, "Range split, starting hand-off");

            if let Err(e) = self
                .migrate(&source, &destination, MigrationKind::Join)
                .await
            {
                warn!(%node, "Join hand-off failed, rolling back: {}", e);
                ring.leave(&node);
                self.set_state(conn, MemberState::Connected);
                self.send_to(conn, &ControlMessage::TryAgain);
                return;
            }
        }

        self.set_state(conn, MemberState::Active);
        self.broadcast_metadata(&ring);
        info!(%node, nodes = ring.size(), "Node joined the ring");
    }

    async fn handle_leave(self: Arc<Self>, conn: ConnectionId, node: NodeId) {
        let mut ring = self.ring.lock().await;
        info!(%node, "Node leaving the ring");

        self.set_state(conn, MemberState::Migrating);
        let leaving = ring.get(&node).cloned();
        let donee = ring.leave(&node);

        if let (Some(source), Some(destination)) = (leaving, donee) {
            if let Err(e) = self
                .migrate(&source, &destination, MigrationKind::Removal)
                .await
            {
                warn!(%node, "Leave hand-off failed, data may be lost: {}", e);
            }
        } else {
            info!(%node, "Last node leaving, its data is dropped");
        }

        if let Some(mut member) = self.members.get_mut(&conn) {
            member.send(&ControlMessage::Shutdown);
            member.shutdown_sent = true;
            member.state = MemberState::Removed;
        }
        self.broadcast_metadata(&ring);

        if let Some((_, mut member)) = self.members.remove(&conn) {
            member.close();
        }
        if let Some((_, probe)) = self.probes.remove(&conn) {
            probe.abort();
        }
        info!(%node, "Removed node");
    }

    async fn handle_disconnect(self: Arc<Self>, conn: ConnectionId) {
        // Drops any armed completion signal so a pending hand-off sees the peer vanish.
        self.confirmations.remove(&conn);

        let shutdown_sent = match self.members.get(&conn) {
            Some(member) => member.shutdown_sent,
            None => return,
        };

        if !shutdown_sent {
            warn!(connection = %conn, "Node shut down abnormally");
            self.remove_failed_member(conn).await;
        }
    }
}
