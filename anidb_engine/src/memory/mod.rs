//! Memory accounting and pressure signalling
//!
//! The [`MemoryMonitor`] tracks the approximate bytes held by the engine:
//! - chunk buffers leased to readers (in flight or parked in the pool)
//! - cache entries, reported by the hash cache as a running total
//!
//! Usage relative to `max_memory` is classified into a [`MemoryPressure`]
//! level which the scheduler consults before admitting new work.

use crate::{Error, Result, error::InternalError, error::ValidationError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod pool;
mod tracker;

pub use pool::{BufferLease, BufferPool};
pub use tracker::MemoryTracker;

/// Default memory limit (500MB)
pub const DEFAULT_MEMORY_LIMIT: usize = 500 * 1024 * 1024;

/// Usage fraction at which pressure becomes Medium
pub const MEMORY_MEDIUM_THRESHOLD: f64 = 0.5;

/// Usage fraction at which pressure becomes High (80% of limit)
pub const MEMORY_WARNING_THRESHOLD: f64 = 0.8;

/// Usage fraction at which pressure becomes Critical (95% of limit)
pub const MEMORY_CRITICAL_THRESHOLD: f64 = 0.95;

/// Coarse classification of memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Configuration for the memory monitor
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum total memory that can be allocated (hard limit)
    pub max_memory: usize,
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    /// Maximum number of idle chunk buffers kept for reuse
    pub max_pooled_buffers: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory: DEFAULT_MEMORY_LIMIT,
            medium_threshold: MEMORY_MEDIUM_THRESHOLD,
            high_threshold: MEMORY_WARNING_THRESHOLD,
            critical_threshold: MEMORY_CRITICAL_THRESHOLD,
            max_pooled_buffers: 16,
        }
    }
}

impl MemoryConfig {
    /// Config with the default thresholds and the given limit (0 = default)
    pub fn with_limit(max_memory: usize) -> Self {
        Self {
            max_memory: if max_memory == 0 {
                DEFAULT_MEMORY_LIMIT
            } else {
                max_memory
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_memory == 0 {
            return Err(Error::Validation(ValidationError::invalid_configuration(
                "max_memory must be greater than zero",
            )));
        }

        let ordered = 0.0 < self.medium_threshold
            && self.medium_threshold <= self.high_threshold
            && self.high_threshold <= self.critical_threshold
            && self.critical_threshold <= 1.0;
        if !ordered {
            return Err(Error::Validation(ValidationError::invalid_configuration(
                "memory thresholds must satisfy 0 < medium <= high <= critical <= 1",
            )));
        }
        Ok(())
    }
}

/// Snapshot of memory usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Buffers (leased and pooled) plus cache bytes
    pub total_used: usize,
    /// Bytes held by idle pooled buffers
    pub pool_memory: usize,
    /// Bytes attributed to cache entries
    pub cache_memory: usize,
    /// Buffers currently leased to readers
    pub active_buffers: usize,
    pub peak_usage: usize,
    pub limit: usize,
    pub pressure: MemoryPressure,
}

/// Engine-wide memory accounting
pub struct MemoryMonitor {
    config: MemoryConfig,
    tracker: MemoryTracker,
    pool: BufferPool,
    cache_bytes: AtomicUsize,
    active_buffers: AtomicUsize,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            tracker: MemoryTracker::new(config.max_memory),
            pool: BufferPool::new(config.max_pooled_buffers),
            cache_bytes: AtomicUsize::new(0),
            active_buffers: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Lease a buffer of `size` bytes, reusing a pooled one if possible
    pub fn acquire_buffer(self: &Arc<Self>, size: usize) -> Result<BufferLease> {
        let buffer = match self.pool.try_acquire(size) {
            Some(buffer) => buffer,
            None => {
                self.tracker
                    .try_allocate(size, self.cache_bytes.load(Ordering::Acquire))?;
                vec![0u8; size]
            }
        };

        self.active_buffers.fetch_add(1, Ordering::AcqRel);
        Ok(BufferLease::new(buffer, Arc::clone(self)))
    }

    pub(crate) fn release_buffer(&self, buffer: Vec<u8>) {
        self.active_buffers.fetch_sub(1, Ordering::AcqRel);

        let keep = self.pressure() < MemoryPressure::High;
        let rejected = if keep {
            self.pool.release(buffer)
        } else {
            Some(buffer)
        };

        if let Some(buffer) = rejected {
            self.tracker.deallocate(buffer.len());
        }
    }

    /// Record the current total size of cache entries
    pub fn set_cache_bytes(&self, bytes: usize) {
        self.cache_bytes.store(bytes, Ordering::Release);
        self.tracker.observe_peak(self.total_used());
    }

    /// Buffers plus cache, in bytes
    pub fn total_used(&self) -> usize {
        self.tracker.used() + self.cache_bytes.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.config.max_memory
    }

    /// Current pressure level
    pub fn pressure(&self) -> MemoryPressure {
        let ratio = self.total_used() as f64 / self.config.max_memory as f64;

        if ratio >= self.config.critical_threshold {
            MemoryPressure::Critical
        } else if ratio >= self.config.high_threshold {
            MemoryPressure::High
        } else if ratio >= self.config.medium_threshold {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }

    /// Pressure after dropping pooled buffers if usage is at least High
    fn relieved_pressure(&self) -> MemoryPressure {
        let pressure = self.pressure();
        if pressure < MemoryPressure::High || self.pool.is_empty() {
            return pressure;
        }

        let freed = self.shrink();
        debug!("Released {freed} pooled bytes under {pressure:?} memory pressure");
        self.pressure()
    }

    /// Concurrency to admit given a requested maximum
    ///
    /// High pressure halves the limit (never below one); Critical returns zero,
    /// meaning no new work may start.
    pub fn effective_concurrency(&self, max_concurrent: usize) -> usize {
        match self.relieved_pressure() {
            MemoryPressure::Low | MemoryPressure::Medium => max_concurrent,
            MemoryPressure::High => (max_concurrent / 2).max(1),
            MemoryPressure::Critical => 0,
        }
    }

    /// Refuse new work while pressure is Critical
    pub fn check_admission(&self) -> Result<()> {
        if self.relieved_pressure() == MemoryPressure::Critical {
            let used = self.total_used();
            warn!(
                "Refusing new work: memory usage {used} bytes is critical (limit {})",
                self.config.max_memory
            );
            return Err(Error::Internal(InternalError::memory_limit_exceeded(
                self.config.max_memory,
                used,
            )));
        }
        Ok(())
    }

    /// Drop all pooled buffers, returning the bytes released
    pub fn shrink(&self) -> usize {
        let freed = self.pool.drain();
        self.tracker.deallocate(freed);
        freed
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_used: self.total_used(),
            pool_memory: self.pool.pooled_bytes(),
            cache_memory: self.cache_bytes.load(Ordering::Acquire),
            active_buffers: self.active_buffers.load(Ordering::Acquire),
            peak_usage: self.tracker.peak(),
            limit: self.config.max_memory,
            pressure: self.pressure(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(limit: usize) -> Arc<MemoryMonitor> {
        Arc::new(MemoryMonitor::new(MemoryConfig::with_limit(limit)))
    }

    #[test]
    fn test_zero_limit_means_default() {
        assert_eq!(MemoryConfig::with_limit(0).max_memory, DEFAULT_MEMORY_LIMIT);
    }

    #[test]
    fn test_config_validation() {
        assert!(MemoryConfig::default().validate().is_ok());

        let inverted = MemoryConfig {
            high_threshold: 0.99,
            critical_threshold: 0.9,
            ..MemoryConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_pressure_levels() {
        let monitor = monitor(1000);
        assert_eq!(monitor.pressure(), MemoryPressure::Low);

        monitor.set_cache_bytes(500);
        assert_eq!(monitor.pressure(), MemoryPressure::Medium);

        monitor.set_cache_bytes(800);
        assert_eq!(monitor.pressure(), MemoryPressure::High);

        monitor.set_cache_bytes(950);
        assert_eq!(monitor.pressure(), MemoryPressure::Critical);
    }

    #[test]
    fn test_effective_concurrency() {
        let monitor = monitor(1000);
        assert_eq!(monitor.effective_concurrency(8), 8);

        monitor.set_cache_bytes(600);
        assert_eq!(monitor.effective_concurrency(8), 8);

        monitor.set_cache_bytes(850);
        assert_eq!(monitor.effective_concurrency(8), 4);
        assert_eq!(monitor.effective_concurrency(1), 1);

        monitor.set_cache_bytes(990);
        assert_eq!(monitor.effective_concurrency(8), 0);
        assert!(monitor.check_admission().is_err());

        monitor.set_cache_bytes(100);
        assert!(monitor.check_admission().is_ok());
    }

    #[test]
    fn test_buffer_lease_returns_to_pool() {
        let monitor = monitor(1024 * 1024);

        let lease = monitor.acquire_buffer(4096).unwrap();
        assert_eq!(lease.len(), 4096);
        assert_eq!(monitor.stats().active_buffers, 1);
        assert_eq!(monitor.total_used(), 4096);
        drop(lease);

        let stats = monitor.stats();
        assert_eq!(stats.active_buffers, 0);
        assert_eq!(stats.pool_memory, 4096);
        // Pooled buffers stay accounted
        assert_eq!(stats.total_used, 4096);

        let _again = monitor.acquire_buffer(4096).unwrap();
        assert_eq!(monitor.stats().pool_memory, 0);
        assert_eq!(monitor.total_used(), 4096);
    }

    #[test]
    fn test_buffer_allocation_respects_limit() {
        let monitor = monitor(10_000);
        monitor.set_cache_bytes(8_000);

        let err = monitor.acquire_buffer(4_096).err().unwrap();
        assert!(err.to_string().contains("Memory limit exceeded"));
        assert_eq!(monitor.stats().active_buffers, 0);
    }

    #[test]
    fn test_shrink_releases_pooled_memory() {
        let monitor = monitor(1024 * 1024);
        drop(monitor.acquire_buffer(1024).unwrap());
        drop(monitor.acquire_buffer(2048).unwrap());

        assert_eq!(monitor.shrink(), 3072);
        assert_eq!(monitor.total_used(), 0);
        assert_eq!(monitor.stats().peak_usage, 2048 + 1024);
    }
}
