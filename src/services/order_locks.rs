use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// In-process async mutex per order id.
///
/// Every mutation of return cases that belong to one order runs while the
/// order's guard is held, from the eligibility check through commit. An
/// order's entry lives only while somebody holds or waits for its lock.
#[derive(Clone, Default)]
pub struct OrderLocks {
    locks: Arc<LockMap>,
}

/// Held lock on one order. Dropping it releases the lock and removes the
/// map entry when no other task holds or waits for it.
pub struct OrderGuard {
    order_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own Arc is the last one left once every holder and
        // waiter is gone. `remove_if` runs under the shard lock, so a
        // concurrent `acquire` either sees the entry or inserts a new one.
        self.locks
            .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OrderGuard {
        let lock = self
            .locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        metrics::counter!("returns_engine_order_lock_acquisitions_total", 1);
        let guard = lock.lock_owned().await;
        OrderGuard {
            order_id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of orders currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
