//! Buffer pool contract for DATA/FLUSH payload storage.
//!
//! The memory arena itself lives outside this crate. The core consumes it via
//! [`BufferPool`] (`acquire` / `release`) and never keeps a [`BufferHandle`]
//! past the terminal state of its owning direction.
//!
//! # Release discipline
//!
//! Handles are not `Clone`. Inside the crate they are always wrapped in a
//! [`PooledBuffer`], which returns the handle to its pool exactly once: on
//! drop, or earlier through [`PooledBuffer::release`].
//!
//! [`MemoryPool`] is a capacity-accounting implementation using atomic
//! counters, suitable for tests and single-process deployments.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{HalfDuplexError, Result};

/// Default pool capacity (1 MB).
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

/// Default minimum block size (8 KB). Requests are rounded up to whole blocks.
pub const DEFAULT_MIN_BLOCK_SIZE: usize = 8 * 1024;

/// Opaque reference to storage granted by a pool.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: u64,
    size: usize,
}

impl BufferHandle {
    /// Create a handle. Intended for [`BufferPool`] implementations.
    pub fn new(id: u64, size: usize) -> Self {
        Self { id, size }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Granted size in bytes (may exceed the requested size).
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Supplier of payload storage.
pub trait BufferPool: Send + Sync {
    /// Acquire at least `size` bytes. Fails with `OutOfMemory` when exhausted.
    fn acquire(&self, size: usize) -> Result<BufferHandle>;

    /// Return a handle to the pool.
    fn release(&self, handle: BufferHandle);
}

impl fmt::Debug for dyn BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BufferPool")
    }
}

/// A handle tied to its pool; released exactly once.
pub struct PooledBuffer {
    pool: Arc<dyn BufferPool>,
    handle: Option<BufferHandle>,
    requested: usize,
}

impl PooledBuffer {
    /// Acquire `size` bytes from `pool`.
    pub fn acquire(pool: &Arc<dyn BufferPool>, size: usize) -> Result<Self> {
        let handle = pool.acquire(size)?;
        Ok(Self {
            pool: pool.clone(),
            handle: Some(handle),
            requested: size,
        })
    }

    /// Bytes originally requested.
    #[inline]
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Bytes granted by the pool.
    #[inline]
    pub fn granted(&self) -> usize {
        self.handle.as_ref().map_or(0, BufferHandle::size)
    }

    /// Release now instead of on drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("handle", &self.handle)
            .field("requested", &self.requested)
            .finish()
    }
}

/// Capacity-accounting pool.
///
/// Uses atomic operations for lock-free tracking; it can be shared across
/// threads.
#[derive(Debug)]
pub struct MemoryPool {
    capacity: usize,
    block_size: usize,
    used: AtomicUsize,
    next_id: AtomicU64,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MemoryPool {
    /// Create a pool with the given capacity and minimum block size.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            capacity,
            block_size: block_size.max(1),
            used: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    /// Create a shared pool behind the trait object the coordinator expects.
    pub fn shared(capacity: usize, block_size: usize) -> Arc<dyn BufferPool> {
        Arc::new(Self::new(capacity, block_size))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes currently granted.
    #[inline]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Total successful acquisitions.
    #[inline]
    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    /// Total releases.
    #[inline]
    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Handles granted and not yet released.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.acquire_count().saturating_sub(self.release_count())
    }

    fn round_up(&self, size: usize) -> usize {
        size.div_ceil(self.block_size) * self.block_size
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MIN_BLOCK_SIZE)
    }
}

impl BufferPool for MemoryPool {
    fn acquire(&self, size: usize) -> Result<BufferHandle> {
        let granted = self.round_up(size);

        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(granted)
                .filter(|&next| next <= self.capacity)
                .ok_or(HalfDuplexError::OutOfMemory {
                    requested: size,
                    available: self.capacity.saturating_sub(current),
                })?;

            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.acquired.fetch_add(1, Ordering::AcqRel);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(BufferHandle::new(id, granted))
    }

    fn release(&self, handle: BufferHandle) {
        self.used.fetch_sub(handle.size(), Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}
