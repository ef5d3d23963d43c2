//! Hash Ring Module
//!
//! Maps the 128-bit MD5 hash space onto storage nodes.
//!
//! ## Core Concepts
//! - **Line ownership**: Primary ownership treats the hash space as a bounded line
//!   `[0, 2^128 - 1]`. The lowest node always starts at `0` and the highest node always
//!   ends at the maximum; there is no wraparound for primary ranges.
//! - **Identity hash**: A node sits on the line at `md5("ip:port")` of its client address.
//! - **Metadata**: The serialized partition map (`first,last,ip:port;...`) shared with
//!   nodes and clients. Replica sets reuse the same serialization.

pub mod hash;
pub mod hashing;
pub mod types;

pub use hash::{HashValue, MAX_HASH, MIN_HASH, hash_key};
pub use hashing::HashRing;
pub use types::{KeyRange, Metadata, NodeEntry, NodeId, ReplicaSet};
