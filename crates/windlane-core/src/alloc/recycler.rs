//! Thread-shareable recycling handle.
//!
//! An emitter owns the pools its envelopes come from; the replicas that
//! consume those envelopes run on other threads and hand them back through a
//! cloned [`Recycler`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::ObjectPool;

/// Default number of idle envelopes retained per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 2048;

/// Objects that can be cleared for reuse.
pub trait Recyclable {
    /// Clears the object back to its freshly constructed state.
    ///
    /// Implementations should keep heap capacity so that reuse avoids allocation.
    fn reset(&mut self);
}

impl<T> Recyclable for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

struct Shared<T> {
    pool: Mutex<ObjectPool<T>>,
    recycled: AtomicU64,
}

/// Cloneable handle to a bounded pool of reusable objects.
///
/// Clones refer to the same pool. The lock is held only for the push/pop of
/// the free list, never while an object is in use.
pub struct Recycler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Recycler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Recyclable + Default> Recycler<T> {
    /// Creates a recycler retaining at most `capacity` idle objects.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool: Mutex::new(ObjectPool::new(capacity)),
                recycled: AtomicU64::new(0),
            }),
        }
    }

    /// Takes an idle object or constructs a fresh one.
    #[inline]
    pub fn acquire(&self) -> T {
        self.shared.pool.lock().acquire().unwrap_or_default()
    }

    /// Resets `value` and returns it to the pool.
    ///
    /// Returns `false` if the pool was full and the value was dropped.
    #[inline]
    pub fn recycle(&self, mut value: T) -> bool {
        value.reset();
        self.shared.recycled.fetch_add(1, Ordering::Relaxed);
        self.shared.pool.lock().release(value)
    }

    /// Total number of objects handed back through [`recycle`](Self::recycle).
    #[must_use]
    pub fn recycled(&self) -> u64 {
        self.shared.recycled.load(Ordering::Relaxed)
    }

    /// Number of idle objects currently pooled.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.pool.lock().available()
    }

    /// Returns true if both handles refer to the same pool.
    #[must_use]
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Recyclable + Default> Default for Recycler<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl<T> fmt::Debug for Recycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("recycled", &self.shared.recycled.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
