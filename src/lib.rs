//! Partitioned, Replicated Key-Value Store
//!
//! This library crate defines the modules shared by the coordinator, the storage nodes and
//! the client. It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`ring`**: MD5 hash space, node identities and the consistent-hash ring that assigns
//!   each node a contiguous range.
//! - **`protocol`**: The newline-delimited text protocol spoken on control, data,
//!   migration and replication connections.
//! - **`ecs`**: The External Coordination Service. Owns the ring, runs joins and leaves
//!   with a two-phase data hand-off, detects failed nodes and plans replica sets.
//! - **`node`**: A storage node serving its range, following coordinator instructions
//!   and pushing mutations to its replicas.
//! - **`client`**: A router that caches the partition map and retries around topology
//!   changes.
//! - **`storage`**: The in-memory key-value contract used for primary and replica data.

pub mod client;
pub mod config;
pub mod ecs;
pub mod error;
pub mod node;
pub mod protocol;
pub mod ring;
pub mod storage;
