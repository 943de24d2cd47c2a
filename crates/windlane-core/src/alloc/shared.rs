//! Reference-counted envelopes shared by several destinations.
//!
//! A punctuation (or a broadcast tuple) is built once and handed to every
//! destination. Each destination holds a [`Pooled`] clone; the strong count
//! of the inner `Arc` is the outstanding-consumer counter. Releasing uses
//! `Arc::into_inner`, which succeeds for exactly one holder, so the object is
//! returned to its pool once no matter which consumer finishes last.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::{Recyclable, Recycler};

/// Shared handle to a pooled envelope.
pub struct Pooled<M> {
    value: Arc<M>,
    recycler: Option<Recycler<M>>,
}

impl<M> Pooled<M> {
    /// Wraps `value`, returning it to `recycler` when the last holder releases it.
    #[must_use]
    pub fn new(value: M, recycler: Option<Recycler<M>>) -> Self {
        Self {
            value: Arc::new(value),
            recycler,
        }
    }

    /// Wraps `value` without a pool; the last release simply drops it.
    #[must_use]
    pub fn detached(value: M) -> Self {
        Self::new(value, None)
    }

    /// Number of outstanding holders, including this one.
    #[inline]
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.value)
    }

    /// Returns true if this is the only holder.
    #[inline]
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.holders() == 1
    }

    /// Mutable access, available only while the handle is not shared.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut M> {
        Arc::get_mut(&mut self.value)
    }
}

impl<M: Recyclable + Default> Pooled<M> {
    /// Gives up this reference.
    ///
    /// Returns `true` for the holder that dropped the last reference; that
    /// holder also hands the object back to its pool.
    pub fn release(self) -> bool {
        let Self { value, recycler } = self;
        match Arc::into_inner(value) {
            Some(inner) => {
                if let Some(recycler) = recycler {
                    recycler.recycle(inner);
                }
                true
            }
            None => false,
        }
    }
}

impl<M> Clone for Pooled<M> {
    /// Adds a holder. The envelope itself is not copied.
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            recycler: self.recycler.clone(),
        }
    }
}

impl<M> Deref for Pooled<M> {
    type Target = M;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<M: fmt::Debug> fmt::Debug for Pooled<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("value", &*self.value)
            .field("holders", &self.holders())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder_release_recycles() {
        let recycler: Recycler<Vec<u32>> = Recycler::new(4);
        let pooled = Pooled::new(vec![1, 2], Some(recycler.clone()));
        assert!(pooled.is_unique());
        assert!(pooled.release());
        assert_eq!(recycler.recycled(), 1);
        assert_eq!(recycler.available(), 1);
    }

    #[test]
    fn test_last_release_wins_in_any_order() {
        let recycler: Recycler<Vec<u32>> = Recycler::new(4);
        let first = Pooled::new(vec![9], Some(recycler.clone()));
        let second = first.clone();
        let third = first.clone();
        assert_eq!(first.holders(), 3);

        assert!(!second.release());
        assert!(!first.release());
        assert_eq!(recycler.recycled(), 0);
        assert!(third.release());
        assert_eq!(recycler.recycled(), 1);
    }

    #[test]
    fn test_get_mut_only_when_unique() {
        let mut pooled = Pooled::detached(vec![1u32]);
        pooled.get_mut().unwrap().push(2);
        let other = pooled.clone();
        assert!(pooled.get_mut().is_none());
        drop(other);
        assert_eq!(pooled.get_mut().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_release_recycles_once() {
        for _ in 0..50 {
            let recycler: Recycler<Vec<u8>> = Recycler::new(8);
            let pooled = Pooled::new(vec![0u8; 8], Some(recycler.clone()));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let copy = pooled.clone();
                    std::thread::spawn(move || copy.release())
                })
                .collect();
            let mut last = usize::from(pooled.release());
            for h in handles {
                last += usize::from(h.join().unwrap());
            }
            assert_eq!(last, 1);
            assert_eq!(recycler.recycled(), 1);
        }
    }
}
