//! External Coordination Service (ECS)
//!
//! The single process holding the authoritative hash ring. Storage nodes keep one control
//! connection to it; it decides who owns what and who must move data to whom.
//!
//! ## Core Concepts
//! - **Global ring lock**: Join, leave and forced removal each run start to finish (including
//!   the data hand-off) under one mutex, so only one structural change is ever in flight.
//! - **Two-phase hand-off**: The destination is told to receive before the source is told to
//!   send; the coordinator then waits a bounded number of polls for both to confirm.
//! - **Failure detection**: Every joined node gets its own TCP reachability probe. A failed
//!   probe or an abnormal disconnect removes the node without a hand-off.
//! - **Replication planning**: On a fixed interval each node receives its replica set, the
//!   next nodes in hash order with wraparound.

pub mod detector;
pub mod handlers;
pub mod migration;
pub mod replication;
pub mod service;
pub mod types;

pub use replication::compute_replica_plan;
pub use service::Coordinator;
pub use types::{ConnectionId, MemberInfo, MemberState, MigrationKind, RingEntryInfo};
