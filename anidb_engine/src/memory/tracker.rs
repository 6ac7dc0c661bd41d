//! Byte accounting against a hard limit

use crate::{Error, Result, error::InternalError};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free byte counter enforcing an upper limit
pub struct MemoryTracker {
    used: AtomicUsize,
    peak: AtomicUsize,
    limit: usize,
}

impl MemoryTracker {
    /// Create a new memory tracker with the specified limit
    pub fn new(limit: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit,
        }
    }

    /// Get current tracked usage
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Highest usage observed so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Get memory limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Try to reserve `size` bytes
    ///
    /// `reserved` is usage held outside this tracker (e.g. cache entries) that
    /// still counts against the limit.
    pub fn try_allocate(&self, size: usize, reserved: usize) -> Result<()> {
        let mut current = self.used.load(Ordering::Acquire);

        loop {
            let new_used = current + size;
            let total = new_used + reserved;

            if total > self.limit {
                return Err(Error::Internal(InternalError::memory_limit_exceeded(
                    self.limit, total,
                )));
            }

            match self.used.compare_exchange_weak(
                current,
                new_used,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(total, Ordering::AcqRel);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Release previously reserved bytes
    pub fn deallocate(&self, size: usize) {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(size))
            })
            .ok();
    }

    /// Record a usage level reached outside `try_allocate`
    pub(crate) fn observe_peak(&self, total: usize) {
        self.peak.fetch_max(total, Ordering::AcqRel);
    }
}
