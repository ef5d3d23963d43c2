//! Local Storage Module
//!
//! The key-value contract a node's data path is written against.
//!
//! ## Core Concepts
//! - **Contract**: `get/put/delete/keys` over string keys and values. Disk formats and cache
//!   eviction live behind this trait and are not part of the cluster logic.
//! - **Namespaces**: Each node owns two stores, the primary namespace for keys in its own
//!   range and a replica namespace for keys pushed to it by other primaries.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StorageError;

/// Whether a `put` inserted a new key or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    Created,
    Updated,
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: &str) -> Result<PutStatus, StorageError>;

    /// Returns `false` when the key did not exist.
    fn delete(&self, key: &str) -> bool;

    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
