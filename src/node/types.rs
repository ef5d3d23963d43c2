use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

/// Per-node write-lock. While any guard is alive, `put` and `delete` from clients are
/// rejected with `server_write_lock`; reads and stream traffic are unaffected.
/// Guards nest.
///
/// Client writes run inside a [`WritePermit`]. Acquiring the lock first raises the holder
/// count, so no new permit is granted, then waits for the permits already handed out,
/// so the store is quiescent once `acquire` returns.
#[derive(Debug, Clone, Default)]
pub struct WriteLock {
    holders: Arc<AtomicUsize>,
    in_flight: Arc<RwLock<()>>,
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> WriteLockGuard {
        self.holders.fetch_add(1, Ordering::SeqCst);
        let guard = WriteLockGuard {
            holders: self.holders.clone(),
        };
        drop(self.in_flight.write().await);
        guard
    }

    /// Admits one client write, or `None` while the lock is held.
    pub fn try_enter(&self) -> Option<WritePermit> {
        let permit = self.in_flight.clone().try_read_owned().ok()?;
        if self.is_locked() {
            return None;
        }
        Some(WritePermit { _permit: permit })
    }

    pub fn is_locked(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

#[must_use = "the write-lock is released when the guard is dropped"]
#[derive(Debug)]
pub struct WriteLockGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held by a client write from the lock check until its mutation is journaled.
#[derive(Debug)]
pub struct WritePermit {
    _permit: OwnedRwLockReadGuard<()>,
}
