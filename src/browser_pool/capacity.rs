//! Bounded capacity gate for pooled resources
//!
//! Wraps a semaphore so that slot accounting has exactly one owner: every
//! live resource holds a permit, and dropping the resource (release *or*
//! eviction) frees its slot. That makes it impossible for eviction to leak
//! capacity — the failure mode where a pool silently shrinks below its
//! configured max over time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PoolError;

/// Fixed-size slot gate
#[derive(Debug)]
pub struct CapacityGate {
    sem: Arc<Semaphore>,
    max: usize,
}

impl CapacityGate {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Take a slot immediately if one is free
    #[must_use]
    pub fn try_reserve(&self) -> Option<OwnedSemaphorePermit> {
        self.sem.clone().try_acquire_owned().ok()
    }

    /// Wait up to `timeout` for a slot, then fail with `Exhausted`.
    ///
    /// The semaphore is never closed, so the only failure mode is the
    /// timeout itself.
    pub async fn reserve(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, PoolError> {
        match tokio::time::timeout(timeout, self.sem.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => Err(PoolError::Exhausted {
                waited_secs: timeout.as_secs(),
                max: self.max,
            }),
        }
    }

    /// Configured maximum number of slots
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots currently held
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.max - self.sem.available_permits()
    }
}
