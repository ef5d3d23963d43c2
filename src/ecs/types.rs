use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::protocol::ControlMessage;
use crate::ring::NodeId;

/// Identifies one accepted control connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a control connection as seen by the coordinator.
///
/// `Connected -> AddPending -> Active -> (Migrating) -> Removed`. A rolled-back join
/// returns to `Connected`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberState {
    Connected,
    AddPending,
    Active,
    Migrating,
    Removed,
}

/// Why a hand-off is running; decides what a failure means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationKind {
    /// A failed hand-off rolls the join back.
    Join,
    /// The hand-off is best effort; the node leaves regardless.
    Removal,
}

/// A storage node's control connection.
#[derive(Debug)]
pub struct Member {
    pub conn: ConnectionId,
    pub peer: SocketAddr,
    /// Set once the node announced its client port with `add`.
    pub node: Option<NodeId>,
    pub state: MemberState,
    pub shutdown_sent: bool,
    pub(crate) tx: mpsc::UnboundedSender<String>,
    pub(crate) close: Option<oneshot::Sender<()>>,
}

impl Member {
    pub fn new(
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<String>,
        close: oneshot::Sender<()>,
    ) -> Self {
        Self {
            conn: ConnectionId::new(),
            peer,
            node: None,
            state: MemberState::Connected,
            shutdown_sent: false,
            tx,
            close: Some(close),
        }
    }

    /// Queues a control line. Returns `false` if the writer task is gone.
    pub fn send(&self, msg: &ControlMessage) -> bool {
        self.tx.send(msg.to_string()).is_ok()
    }

    /// Stops the connection's reader task; the writer ends once `tx` is dropped.
    pub(crate) fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }

    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            connection_id: self.conn,
            peer: self.peer,
            node: self.node.map(|n| n.to_string()),
            state: self.state,
        }
    }
}

/// JSON view of a member for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    pub connection_id: ConnectionId,
    pub peer: SocketAddr,
    pub node: Option<String>,
    pub state: MemberState,
}

/// JSON view of one ring entry. Hashes are decimal strings; JSON numbers cannot hold them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RingEntryInfo {
    pub node: String,
    pub range_start: String,
    pub range_end: String,
}
