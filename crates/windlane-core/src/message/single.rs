//! Single-tuple envelope.

use smallvec::SmallVec;

use crate::alloc::Recyclable;

/// Envelope carrying one tuple.
///
/// Data envelopes carry a single watermark. A punctuation carries a default
/// payload and one watermark entry per destination of the emitter that built
/// it; all destinations share the same physical envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Single<T> {
    tuple: T,
    id: u64,
    timestamp: u64,
    watermarks: SmallVec<[u64; 4]>,
    punctuation: bool,
}

impl<T: Default> Single<T> {
    /// Creates a data envelope.
    #[must_use]
    pub fn new(tuple: T, id: u64, timestamp: u64, watermark: u64) -> Self {
        let mut single = Self::default();
        single.fill(tuple, id, timestamp, watermark);
        single
    }

    /// Creates a punctuation advancing `destinations` destinations to `watermark`.
    #[must_use]
    pub fn punctuation(watermark: u64, destinations: usize) -> Self {
        let mut single = Self::default();
        single.fill_punctuation(watermark, destinations);
        single
    }

    /// Overwrites a recycled envelope with data.
    pub(crate) fn fill(&mut self, tuple: T, id: u64, timestamp: u64, watermark: u64) {
        self.tuple = tuple;
        self.id = id;
        self.timestamp = timestamp;
        self.watermarks.clear();
        self.watermarks.push(watermark);
        self.punctuation = false;
    }

    /// Overwrites a recycled envelope with a punctuation.
    pub(crate) fn fill_punctuation(&mut self, watermark: u64, destinations: usize) {
        self.tuple = T::default();
        self.id = 0;
        self.timestamp = watermark;
        self.watermarks.clear();
        self.watermarks
            .extend(std::iter::repeat(watermark).take(destinations.max(1)));
        self.punctuation = true;
    }
}

impl<T> Single<T> {
    /// The payload.
    #[inline]
    #[must_use]
    pub fn tuple(&self) -> &T {
        &self.tuple
    }

    /// Mutable payload access.
    #[inline]
    pub fn tuple_mut(&mut self) -> &mut T {
        &mut self.tuple
    }

    /// Routing identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Event timestamp.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Watermark carried by the envelope.
    ///
    /// For punctuations this is the smallest per-destination entry.
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

    /// Returns true if this envelope only carries progress.
    #[inline]
    #[must_use]
    pub fn is_punctuation(&self) -> bool {
        self.punctuation
    }
}

impl<T: Default> Recyclable for Single<T> {
    fn reset(&mut self) {
        self.tuple = T::default();
        self.id = 0;
        self.timestamp = 0;
        self.watermarks.clear();
        self.punctuation = false;
    }
}
