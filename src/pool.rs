//! Bounded worker slot pool.
//!
//! The pool is the single throttle on parallel runner invocations: it is
//! sized once at construction and never grows, which is what protects
//! downstream browser grids and device farms from being flooded. Slots are
//! acquired by the dispatcher's coordination loops and returned when the
//! attempt (or shard) finishes.

use std::sync::{Arc, Mutex};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised when acquiring a worker slot.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down; no further slots will be handed out.
    /// Callers treat this as a build-level drain signal.
    #[error("worker pool is closed")]
    Closed,

    /// The caller's cancellation token fired while waiting for a slot.
    #[error("slot acquisition cancelled")]
    Cancelled,
}

/// A fixed-size set of execution slots.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    free_ids: Arc<Mutex<Vec<usize>>>,
    size: usize,
}

/// An acquired execution slot.
///
/// Exactly one attempt (or shard of attempts) runs per held slot. Dropping
/// the slot returns it to the free set.
pub struct WorkerSlot {
    slot_id: usize,
    free_ids: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    /// Stable id of this slot, in `0..pool.size()`.
    pub fn id(&self) -> usize {
        self.slot_id
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.free_ids.lock().unwrap().push(self.slot_id);
    }
}

impl WorkerPool {
    /// Creates a pool with `size` slots.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            free_ids: Arc::new(Mutex::new((0..size).rev().collect())),
            size,
        }
    }

    /// Total number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires a slot, waiting until one is free.
    ///
    /// # Errors
    ///
    /// [`PoolError::Closed`] once [`close`](Self::close) has been called,
    /// [`PoolError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> PoolResult<WorkerSlot> {
        let permit: Result<OwnedSemaphorePermit, AcquireError> = tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        let permit = permit.map_err(|_| PoolError::Closed)?;

        let slot_id = self
            .free_ids
            .lock()
            .unwrap()
            .pop()
            .expect("a free slot id exists for every issued permit");

        Ok(WorkerSlot {
            slot_id,
            free_ids: Arc::clone(&self.free_ids),
            _permit: permit,
        })
    }

    /// Returns a slot to the free set.
    ///
    /// Equivalent to dropping the slot; provided so call sites can make
    /// the release explicit.
    pub fn release(&self, slot: WorkerSlot) {
        drop(slot);
    }

    /// Shuts the pool down: every pending and future acquire fails with
    /// [`PoolError::Closed`]. Already-issued slots stay valid until
    /// released.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_acquire_up_to_size() {
        let pool = WorkerPool::new(2);
        let a = pool.acquire(&token()).await.unwrap();
        let b = pool.acquire(&token()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_release() {
        let pool = Arc::new(WorkerPool::new(1));
        let slot = pool.acquire(&token()).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(&token()).await.map(|s| s.id()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(slot);
        let reacquired = waiter.await.unwrap().unwrap();
        assert_eq!(reacquired, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = WorkerPool::new(2);
        pool.close();
        assert!(matches!(pool.acquire(&token()).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let pool = WorkerPool::new(1);
        let _held = pool.acquire(&token()).await.unwrap();

        let cancel = token();
        cancel.cancel();
        assert!(matches!(
            pool.acquire(&cancel).await,
            Err(PoolError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_slot_ids_recycled() {
        let pool = WorkerPool::new(1);
        let first = pool.acquire(&token()).await.unwrap();
        let id = first.id();
        drop(first);

        let second = pool.acquire(&token()).await.unwrap();
        assert_eq!(second.id(), id);
    }
}
