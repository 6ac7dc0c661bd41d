//! Reusable chunk buffers

use super::MemoryMonitor;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Bounded free list of byte buffers
///
/// Buffers parked here stay accounted in the monitor's tracker until they are
/// drained, so pooled memory still counts toward pressure.
pub struct BufferPool {
    max_buffers: usize,
    buffers: Mutex<VecDeque<Vec<u8>>>,
    pooled_bytes: AtomicUsize,
    reuses: AtomicUsize,
}

impl BufferPool {
    /// Create a pool holding at most `max_buffers` idle buffers
    pub fn new(max_buffers: usize) -> Self {
        Self {
            max_buffers,
            buffers: Mutex::new(VecDeque::with_capacity(max_buffers)),
            pooled_bytes: AtomicUsize::new(0),
            reuses: AtomicUsize::new(0),
        }
    }

    /// Take an idle buffer of exactly `size` bytes, if one is parked
    pub fn try_acquire(&self, size: usize) -> Option<Vec<u8>> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let position = buffers.iter().position(|b| b.len() == size)?;
        let buffer = buffers.remove(position)?;

        self.pooled_bytes.fetch_sub(buffer.len(), Ordering::AcqRel);
        self.reuses.fetch_add(1, Ordering::Relaxed);
        Some(buffer)
    }

    /// Park a buffer for reuse
    ///
    /// Returns the buffer back when the pool is full so the caller can free
    /// its accounting.
    pub fn release(&self, buffer: Vec<u8>) -> Option<Vec<u8>> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() >= self.max_buffers {
            return Some(buffer);
        }

        self.pooled_bytes.fetch_add(buffer.len(), Ordering::AcqRel);
        buffers.push_back(buffer);
        None
    }

    /// Drop every idle buffer, returning the bytes released
    pub fn drain(&self) -> usize {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let freed: usize = buffers.drain(..).map(|b| b.len()).sum();
        self.pooled_bytes.fetch_sub(freed, Ordering::AcqRel);
        freed
    }

    /// Bytes currently parked in the pool
    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes.load(Ordering::Acquire)
    }

    /// Number of idle buffers
    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many acquisitions were served from the pool
    pub fn reuse_count(&self) -> usize {
        self.reuses.load(Ordering::Relaxed)
    }
}

/// A chunk buffer leased from a [`MemoryMonitor`]
///
/// The buffer goes back to the monitor's pool (or is freed) on drop, on every
/// exit path of the reader that holds it.
pub struct BufferLease {
    buffer: Option<Vec<u8>>,
    monitor: Arc<MemoryMonitor>,
}

impl BufferLease {
    pub(super) fn new(buffer: Vec<u8>, monitor: Arc<MemoryMonitor>) -> Self {
        Self {
            buffer: Some(buffer),
            monitor,
        }
    }
}

impl Deref for BufferLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.monitor.release_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let pool = BufferPool::new(5);

        assert!(pool.try_acquire(1024).is_none());

        assert!(pool.release(vec![0u8; 1024]).is_none());
        assert_eq!(pool.pooled_bytes(), 1024);

        // Size must match exactly
        assert!(pool.try_acquire(2048).is_none());

        let acquired = pool.try_acquire(1024).unwrap();
        assert_eq!(acquired.len(), 1024);
        assert!(pool.is_empty());
        assert_eq!(pool.pooled_bytes(), 0);
        assert_eq!(pool.reuse_count(), 1);
    }

    #[test]
    fn test_pool_max_size() {
        let pool = BufferPool::new(3);

        let rejected = (0..5)
            .filter_map(|_| pool.release(vec![0u8; 64]))
            .count();

        assert_eq!(rejected, 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_pool_drain() {
        let pool = BufferPool::new(10);
        for _ in 0..4 {
            pool.release(vec![0u8; 1024]);
        }

        assert_eq!(pool.drain(), 4096);
        assert!(pool.is_empty());
        assert_eq!(pool.pooled_bytes(), 0);
    }
}
