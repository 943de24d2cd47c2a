//! # Lane Queue
//!
//! Bounded lock-free queue backing one producer→consumer lane.
//!
//! ## Design
//!
//! - Head and tail live on separate cache lines
//! - Capacity is rounded to a power of two so wrap-around is a mask
//! - One slot stays empty to tell "full" from "empty"
//! - Acquire/Release ordering publishes each slot to the other side

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Aligns a value to a 64-byte cache line.
#[repr(C, align(64))]
#[derive(Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Wraps `value`.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// Single-producer single-consumer bounded ring buffer.
///
/// Exactly one thread may push and exactly one thread may pop. The lane
/// types in this module enforce that by giving each queue to one
/// [`Outlet`](super::Outlet) and one [`Inlet`](super::Inlet).
///
/// ```rust
/// use windlane_core::channel::SpscQueue;
///
/// let queue: SpscQueue<u32> = SpscQueue::new(8);
/// assert!(queue.push(1).is_ok());
/// assert_eq!(queue.pop(), Some(1));
/// assert_eq!(queue.pop(), None);
/// ```
pub struct SpscQueue<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to read (consumer-owned)
    head: CachePadded<AtomicUsize>,
    /// Next slot to write (producer-owned)
    tail: CachePadded<AtomicUsize>,
    mask: usize,
}

// SAFETY: items are moved between threads, so T: Send suffices
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for SpscQueue<T> {}

// SAFETY: one producer and one consumer touch disjoint slots; slot hand-off
// is ordered by the Release store / Acquire load of head and tail
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a queue with room for at least `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "lane capacity must be > 0");
        let capacity = capacity.next_power_of_two().max(2);
        let buffer: Vec<UnsafeCell<MaybeUninit<T>>> = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            buffer: buffer.into_boxed_slice(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: capacity - 1,
        }
    }

    /// Number of slots; one of them is always kept free.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Snapshot of the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }

    /// Snapshot emptiness check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Snapshot fullness check.
    #[must_use]
    pub fn is_full(&self) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        self.next(tail) == self.head.load(Ordering::Acquire)
    }

    /// Enqueues `item`, handing it back if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` when there is no free slot.
    pub fn push(&self, item: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next_tail = self.next(tail);
        if next_tail == self.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: the slot at `tail` is not visible to the consumer until the
        // tail store below, and only this producer writes it
        #[allow(unsafe_code)]
        unsafe {
            (*self.buffer[tail].get()).write(item);
        }
        self.tail.store(next_tail, Ordering::Release);
        Ok(())
    }

    /// Dequeues the oldest item.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the Acquire load of tail proves the producer published this
        // slot, and only this consumer reads it
        #[allow(unsafe_code)]
        let item = unsafe { (*self.buffer[head].get()).assume_init_read() };
        self.head.store(self.next(head), Ordering::Release);
        Some(item)
    }

    #[inline]
    const fn next(&self, index: usize) -> usize {
        (index + 1) & self.mask
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
