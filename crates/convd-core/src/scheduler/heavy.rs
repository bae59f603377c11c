//! Pool-wide gate for resource-intensive jobs.
//!
//! Whatever the worker count, at most one heavy job holds the gate at a time.
//! Light jobs never touch it.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const HEAVY_SLOTS: usize = 1;

#[derive(Debug, Clone)]
pub(crate) struct HeavyGate {
    slots: Arc<Semaphore>,
}

impl HeavyGate {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Semaphore::new(HEAVY_SLOTS)),
        }
    }

    /// Wait for the heavy slot. The slot is released when the guard drops.
    pub async fn acquire(&self) -> Result<HeavyGuard> {
        let permit = Arc::clone(&self.slots).acquire_owned().await?;
        Ok(HeavyGuard { _permit: permit })
    }

    pub fn is_busy(&self) -> bool {
        self.slots.available_permits() == 0
    }
}

/// RAII guard: holds the heavy slot until dropped.
pub(crate) struct HeavyGuard {
    _permit: OwnedSemaphorePermit,
}
