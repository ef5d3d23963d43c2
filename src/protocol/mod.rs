//! Wire Protocol Module
//!
//! Line-oriented, newline-terminated plain text shared by the coordinator, the
//! storage nodes and the client router.
//!
//! ## Core Concepts
//! - **Control channel**: One long-lived connection per node to the coordinator carrying
//!   [`ControlMessage`]s (`add`, `update`, `invoke transfer to`, `replica update`, ...).
//! - **Data channel**: Clients and peers talk to a node's client port with [`Request`]s and
//!   receive exactly one [`Response`] line per request.
//! - **Streams**: Migration and replication reuse `put`/`delete` records on a node-to-node
//!   connection opened with a distinguishing first line (`this is`, `replica service`).
//! - **Writer tasks**: A socket shared by several tasks is written only by a dedicated
//!   task fed through an mpsc channel, so lines never interleave.

pub mod connection;
pub mod control;
pub mod data;

pub use connection::{LineConnection, LineReader, connect_node, spawn_writer};
pub use control::ControlMessage;
pub use data::{Request, Response};

/// First line a coordinator sends on every accepted control connection.
pub const ECS_WELCOME: &str = "ECS recognized you";

/// Prefix of the first line a node sends on every accepted connection.
pub const NODE_WELCOME_PREFIX: &str = "Connection to Key-Value PUT/GET server established:";

/// End-of-stream marker for a migration, echoed back by the destination.
pub const END_TRANSFER: &str = "confirm end transfer";

/// First line of a migration stream opened by the destination: `this is <ip:port>`.
pub const MIGRATION_HELLO: &str = "this is";

/// First line of a replication stream opened by a primary: `replica service <ip:port>`.
pub const REPLICA_HELLO: &str = "replica service";

/// Sent by a migration source to a peer it was not told to serve.
pub const UNAUTHORISED: &str = "Unauthorised!";

pub fn node_welcome(addr: impl std::fmt::Display) -> String {
    format!("{} {}", NODE_WELCOME_PREFIX, addr)
}
