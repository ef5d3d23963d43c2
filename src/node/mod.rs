//! Storage Node
//!
//! Serves `put`/`get`/`delete` for the key range the coordinator assigned to it, takes part
//! in hand-offs when the ring changes and pushes its mutations to its replicas.
//!
//! ## Core Concepts
//! - **One listener, three kinds of traffic**: The first line of a connection decides its
//!   role. `this is <id>` opens a migration stream, `replica service <id>` opens a replica
//!   push stream, anything else is client traffic.
//! - **Write-lock**: Held while keys leave the node or while a full snapshot is pushed to
//!   replicas. Client writes are refused with `server_write_lock` until it is released.
//! - **Journal**: Every accepted mutation is appended in order and broadcast to the
//!   replicas on the next push tick.
//! - **Replica store**: Keys pushed by other primaries live apart from the node's own data
//!   and are only consulted for reads of ranges this node replicates.

pub mod control;
pub mod processor;
pub mod replication;
pub mod server;
pub mod transfer;
pub mod types;

pub use server::KvNode;
pub use types::{WriteLock, WriteLockGuard, WritePermit};
