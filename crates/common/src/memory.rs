//! Engine-level memory accounting for in-flight batches.
//!
//! Every batch moving between tasks holds a [`MemoryReservation`] taken from the
//! shared [`MemoryPool`]. The reservation is released exactly once, when the batch
//! is closed or dropped, so `live_reservations() == 0` after a query means no
//! batch leaked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{PfqError, Result};

/// Shared engine-level budget.
#[derive(Debug)]
pub struct MemoryPool {
    budget_bytes: usize,
    in_use_bytes: AtomicUsize,
    live_reservations: AtomicUsize,
}

impl MemoryPool {
    /// Create a pool; `usize::MAX` disables the budget check.
    #[must_use]
    pub fn new(budget_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            budget_bytes,
            in_use_bytes: AtomicUsize::new(0),
            live_reservations: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    /// Reserve `bytes`, failing when the budget would be exceeded.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> Result<MemoryReservation> {
        loop {
            let current = self.in_use_bytes.load(Ordering::Acquire);
            let next = current.saturating_add(bytes);
            if self.budget_bytes != usize::MAX && next > self.budget_bytes {
                return Err(PfqError::Execution(format!(
                    "memory budget exceeded: requested {bytes} bytes with {current} of {} in use",
                    self.budget_bytes
                )));
            }
            if self
                .in_use_bytes
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.live_reservations.fetch_add(1, Ordering::AcqRel);
                return Ok(MemoryReservation {
                    pool: Arc::clone(self),
                    reserved_bytes: bytes,
                });
            }
        }
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn in_use_bytes(&self) -> usize {
        self.in_use_bytes.load(Ordering::Acquire)
    }

    /// Number of reservations not yet released.
    pub fn live_reservations(&self) -> usize {
        self.live_reservations.load(Ordering::Acquire)
    }
}

/// RAII reservation that releases pool budget on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    pool: Arc<MemoryPool>,
    reserved_bytes: usize,
}

impl MemoryReservation {
    #[must_use]
    pub fn size(&self) -> usize {
        self.reserved_bytes
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.pool
            .in_use_bytes
            .fetch_sub(self.reserved_bytes, Ordering::AcqRel);
        self.pool.live_reservations.fetch_sub(1, Ordering::AcqRel);
    }
}
