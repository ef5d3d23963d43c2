//! Tunables for the coordinator, storage nodes and the client router.
//!
//! Every config has a production `Default` and a `test_config()` preset with
//! millisecond-scale intervals for in-process clusters.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_REPLICATION_FACTOR: usize = 2;

#[derive(Debug, Clone)]
pub struct EcsConfig {
    pub listen: SocketAddr,
    /// Optional JSON admin listener (`/ring`, `/members`).
    pub admin: Option<SocketAddr>,
    pub replication_factor: usize,
    pub planner_interval: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub probe_initial_delay: Duration,
    pub migration_poll_interval: Duration,
    pub migration_attempts: u32,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 40000)),
            admin: None,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            planner_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_millis(700),
            probe_initial_delay: Duration::from_millis(50),
            migration_poll_interval: Duration::from_secs(2),
            migration_attempts: 10,
        }
    }
}

impl EcsConfig {
    pub fn test_config() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            admin: None,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            planner_interval: Duration::from_millis(200),
            probe_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(300),
            probe_initial_delay: Duration::from_millis(10),
            migration_poll_interval: Duration::from_millis(100),
            migration_attempts: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Client-facing address; also the node's ring identity.
    pub listen: SocketAddr,
    /// Coordinator control address.
    pub bootstrap: SocketAddr,
    pub push_interval: Duration,
    pub replica_backoff_start: Duration,
    pub replica_backoff_cap: Duration,
    pub receive_connect_retry: Duration,
    pub transfer_wait_timeout: Duration,
}

impl NodeConfig {
    pub fn new(listen: SocketAddr, bootstrap: SocketAddr) -> Self {
        Self {
            listen,
            bootstrap,
            push_interval: Duration::from_secs(5),
            replica_backoff_start: Duration::from_millis(500),
            replica_backoff_cap: Duration::from_secs(2),
            receive_connect_retry: Duration::from_secs(2),
            transfer_wait_timeout: Duration::from_secs(20),
        }
    }

    pub fn test_config(listen: SocketAddr, bootstrap: SocketAddr) -> Self {
        Self {
            listen,
            bootstrap,
            push_interval: Duration::from_millis(100),
            replica_backoff_start: Duration::from_millis(20),
            replica_backoff_cap: Duration::from_millis(100),
            receive_connect_retry: Duration::from_millis(100),
            transfer_wait_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_multiplier: f64,
    /// Jitter is drawn uniformly from `[-jitter, +jitter]`.
    pub jitter: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_base: Duration::from_millis(1000),
            backoff_multiplier: 1.25,
            jitter: Duration::from_millis(200),
        }
    }
}

impl ClientConfig {
    pub fn test_config() -> Self {
        Self {
            max_attempts: 10,
            backoff_base: Duration::from_millis(50),
            backoff_multiplier: 1.25,
            jitter: Duration::from_millis(10),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.backoff_base.as_millis() as f64;
        let scaled = base * self.backoff_multiplier.powi(attempt as i32);
        let jitter = self.jitter.as_millis() as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };

        Duration::from_millis((scaled as i64 + offset).max(0) as u64)
    }
}
