//! Bounded worker pool.

use cinder_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed set of execution slots shared across every pipeline run a
/// scheduler instance drives. Clones share capacity.
///
/// Waiters are served in FIFO order, so a pre-empted job that re-queues
/// lands behind slots already requested by a superseding run.
#[derive(Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The slot is returned to the pool when the
    /// guard drops.
    pub async fn acquire(&self) -> Result<WorkerSlot> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("worker pool closed".to_string()))?;
        Ok(WorkerSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// RAII guard for one occupied slot.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}
