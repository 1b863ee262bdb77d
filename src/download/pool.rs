use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};

pub type WorkerId = u64;

/// Membership set of live download workers.
///
/// A worker is a member exactly while it holds a connection attempt or is
/// processing a segment. The manager suspends in [`await_drain`] until
/// membership reaches zero, which is its cue to fetch more seeders or, with
/// an empty queue, finish. Unregistration mutates membership first and only
/// then publishes the new occupancy, so a waiter can never observe a stale
/// non-zero count after the last member left.
///
/// [`await_drain`]: WorkerPool::await_drain
pub struct WorkerPool {
    members: Mutex<HashSet<WorkerId>>,
    next_id: AtomicU64,
    occupancy: watch::Sender<usize>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        let (occupancy, _) = watch::channel(0);
        Self {
            members: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            occupancy,
        }
    }

    /// Adds a new worker and returns its id.
    pub async fn register(&self) -> WorkerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut members = self.members.lock().await;
        members.insert(id);
        self.occupancy.send_replace(members.len());
        id
    }

    /// Removes a worker; the last removal releases anyone blocked in
    /// [`await_drain`](WorkerPool::await_drain).
    pub async fn unregister(&self, id: WorkerId) {
        let mut members = self.members.lock().await;
        members.remove(&id);
        self.occupancy.send_replace(members.len());
    }

    /// Suspends until the pool is empty. Returns immediately on an already
    /// empty pool; never wakes while members remain.
    pub async fn await_drain(&self) {
        let mut rx = self.occupancy.subscribe();
        // wait_for inspects the current value before suspending
        let _ = rx.wait_for(|&occupancy| occupancy == 0).await;
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }
}
