//! Bounded free list for envelope reuse.
//!
//! Keeps up to `capacity` idle objects so that the emit path can reuse
//! envelopes instead of allocating new ones for every tuple.

/// Bounded free list of reusable objects.
///
/// `acquire` pops an idle object, `release` pushes one back. When the free
/// list is full, released objects are dropped so a burst of traffic cannot
/// grow the pool without limit.
///
/// # Example
///
/// ```
/// use windlane_core::alloc::ObjectPool;
///
/// let mut pool: ObjectPool<Vec<u8>> = ObjectPool::with_init(4, || Vec::with_capacity(64));
///
/// let mut buf = pool.acquire().expect("pool not empty");
/// buf.extend_from_slice(b"hello");
///
/// buf.clear();
/// pool.release(buf);
/// assert_eq!(pool.available(), 4);
/// ```
///
/// # Thread Safety
///
/// The pool itself is not synchronized. Share it across threads through
/// [`Recycler`](super::Recycler).
#[derive(Debug)]
pub struct ObjectPool<T> {
    /// Stack of idle objects
    free_list: Vec<T>,
    /// Maximum number of idle objects retained
    capacity: usize,
    /// Number of objects handed out and not yet returned
    in_use: usize,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool retaining at most `capacity` idle objects.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free_list: Vec::with_capacity(capacity),
            capacity,
            in_use: 0,
        }
    }

    /// Creates a pool filled with `capacity` objects built by `factory`.
    ///
    /// ```
    /// use windlane_core::alloc::ObjectPool;
    ///
    /// let pool: ObjectPool<Vec<u8>> = ObjectPool::with_init(8, || Vec::with_capacity(256));
    /// assert_eq!(pool.available(), 8);
    /// ```
    pub fn with_init<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn() -> T,
    {
        let mut pool = Self::new(capacity);
        pool.free_list.extend((0..capacity).map(|_| factory()));
        pool
    }

    /// Takes an idle object, or `None` if the pool is exhausted.
    #[inline]
    pub fn acquire(&mut self) -> Option<T> {
        let obj = self.free_list.pop();
        if obj.is_some() {
            self.in_use += 1;
        }
        obj
    }

    /// Returns an object to the pool.
    ///
    /// Returns `false` when the pool is already full and the object was dropped.
    #[inline]
    pub fn release(&mut self, obj: T) -> bool {
        self.in_use = self.in_use.saturating_sub(1);
        if self.free_list.len() < self.capacity {
            self.free_list.push(obj);
            true
        } else {
            false
        }
    }

    /// Number of idle objects.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Number of objects acquired from the pool and not yet released.
    #[inline]
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Maximum number of idle objects retained.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if no idle object is available.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free_list.is_empty()
    }
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(super::DEFAULT_POOL_CAPACITY)
    }
}
