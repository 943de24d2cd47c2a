//! Fixed-capacity batch envelope.

use smallvec::SmallVec;

use crate::alloc::Recyclable;

/// Ordered tuples with parallel timestamps and one watermark per batch.
///
/// The batch watermark is the largest watermark of the tuples appended to it.
/// A batch punctuation holds a single default tuple plus one watermark entry
/// per destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch<T> {
    tuples: Vec<T>,
    timestamps: Vec<u64>,
    watermarks: SmallVec<[u64; 4]>,
    capacity: usize,
    punctuation: bool,
}

impl<T> Batch<T> {
    /// Creates an empty batch holding at most `capacity` tuples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tuples: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
            watermarks: SmallVec::new(),
            capacity,
            punctuation: false,
        }
    }

    /// Sets the target size of a recycled batch.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.tuples.reserve(capacity.saturating_sub(self.tuples.len()));
        self.timestamps
            .reserve(capacity.saturating_sub(self.timestamps.len()));
    }

    /// Appends a tuple.
    ///
    /// Returns `false` without appending when the batch is already full.
    pub fn push(&mut self, tuple: T, timestamp: u64, watermark: u64) -> bool {
        if self.is_full() {
            return false;
        }
        self.tuples.push(tuple);
        self.timestamps.push(timestamp);
        match self.watermarks.first_mut() {
            Some(wm) => *wm = (*wm).max(watermark),
            None => self.watermarks.push(watermark),
        }
        true
    }

    /// Number of tuples in the batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns true if the batch holds no tuples.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Returns true once the batch reached its target size.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.capacity
    }

    /// Target size of the batch.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The tuples, in append order.
    #[must_use]
    pub fn tuples(&self) -> &[T] {
        &self.tuples
    }

    /// Per-tuple timestamps, parallel to [`tuples`](Self::tuples).
    #[must_use]
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// Iterates `(tuple, timestamp)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&T, u64)> + '_ {
        self.tuples.iter().zip(self.timestamps.iter().copied())
    }

    /// Moves all `(tuple, timestamp)` pairs out, leaving the batch empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (T, u64)> + '_ {
        self.tuples.drain(..).zip(self.timestamps.drain(..))
    }

    /// Batch watermark; for punctuations the smallest per-destination entry.
    #[inline]
    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermarks.iter().copied().min().unwrap_or(0)
    }

    /// Watermark addressed to destination `dest`.
    #[inline]
    #[must_use]
    pub fn watermark_for(&self, dest: usize) -> u64 {
        self.watermarks
            .get(dest)
            .or_else(|| self.watermarks.first())
            .copied()
            .unwrap_or(0)
    }

    /// Returns true if this batch only carries progress.
    #[inline]
    #[must_use]
    pub fn is_punctuation(&self) -> bool {
        self.punctuation
    }
}

impl<T: Default> Batch<T> {
    /// Creates a batch punctuation advancing `destinations` destinations to `watermark`.
    #[must_use]
    pub fn punctuation(watermark: u64, destinations: usize) -> Self {
        let mut batch = Self::with_capacity(1);
        batch.fill_punctuation(watermark, destinations);
        batch
    }

    /// Overwrites a recycled batch with a punctuation.
    pub(crate) fn fill_punctuation(&mut self, watermark: u64, destinations: usize) {
        self.tuples.clear();
        self.timestamps.clear();
        self.tuples.push(T::default());
        self.timestamps.push(watermark);
        self.watermarks.clear();
        self.watermarks
            .extend(std::iter::repeat(watermark).take(destinations.max(1)));
        self.capacity = 1;
        self.punctuation = true;
    }
}

impl<T> Recyclable for Batch<T> {
    fn reset(&mut self) {
        self.tuples.clear();
        self.timestamps.clear();
        self.watermarks.clear();
        self.punctuation = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut batch = Batch::with_capacity(2);
        assert!(batch.push(1u32, 10, 5));
        assert!(batch.push(2u32, 11, 3));
        assert!(batch.is_full());
        assert!(!batch.push(3u32, 12, 6));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.timestamps(), &[10, 11]);
    }

    #[test]
    fn test_watermark_is_maximum() {
        let mut batch = Batch::with_capacity(4);
        batch.push('a', 1, 7);
        batch.push('b', 2, 4);
        batch.push('c', 3, 9);
        assert_eq!(batch.watermark(), 9);
    }

    #[test]
    fn test_drain_moves_tuples_out() {
        let mut batch = Batch::with_capacity(3);
        batch.push(String::from("x"), 1, 1);
        batch.push(String::from("y"), 2, 2);
        let drained: Vec<_> = batch.drain().collect();
        assert_eq!(drained, vec![(String::from("x"), 1), (String::from("y"), 2)]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_punctuation_carries_dummy_tuple() {
        let punct: Batch<u64> = Batch::punctuation(40, 3);
        assert!(punct.is_punctuation());
        assert_eq!(punct.len(), 1);
        assert_eq!(punct.watermark_for(2), 40);
    }

    #[test]
    fn test_reset_keeps_allocation() {
        let mut batch = Batch::with_capacity(16);
        for i in 0..16u64 {
            batch.push(i, i, i);
        }
        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.watermark(), 0);
        assert!(batch.tuples.capacity() >= 16);
    }
}
