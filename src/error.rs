//! Error types shared across the cluster.

use crate::ring::NodeId;

/// Malformed or unexpected lines on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A control line the receiver does not understand.
    #[error("unrecognized control message: {0}")]
    UnknownControl(String),

    /// A data-path response that does not match any known status.
    #[error("unrecognized response: {0}")]
    UnknownResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Outcome of a two-phase hand-off that did not complete.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration did not complete after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("peer {0} disconnected during migration")]
    PeerDisconnected(NodeId),

    #[error("no control connection for {0}")]
    MemberNotFound(NodeId),
}

/// Errors surfaced to callers of the client router.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no server alive")]
    NoServerAlive,

    #[error("request failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("server reported a storage error for key {key}")]
    Storage { key: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
