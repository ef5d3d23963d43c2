//! Client Router
//!
//! Sends `put`/`get`/`delete` to the right storage node without asking the coordinator.
//!
//! ## Core Concepts
//! - **Cached metadata**: The client starts from a single seed address and learns the real
//!   partition map from `server_not_responsible` redirects. The cache is never authoritative.
//! - **Replica-spread reads**: On the first read routed to a primary the client asks for its
//!   replica set and afterwards sends reads to a random member. Writes always go to the
//!   primary.
//! - **Bounded retries**: Busy nodes (`server_stopped`, `server_write_lock`) are retried
//!   with jittered exponential backoff; unreachable nodes are dropped from the cache.

pub mod router;
pub mod types;

pub use router::KvClient;
pub use types::{DeleteOutcome, GetOutcome, PutOutcome};

#[cfg(test)]
mod tests;
