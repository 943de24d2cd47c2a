//! Key extraction and partitioning.
//!
//! Keys are hashed with `FxHash`, which is deterministic across runs and
//! processes, and reduced to a partition by modulo:
//! `partition = hash(key) % partitions`. The same reduction is used by the
//! keyed emitter to pick a destination and by keyed window replicas to decide
//! which keys they own, so both agree on key placement.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fxhash::FxHasher;

/// User function deriving a key from a tuple.
///
/// The function must be deterministic and free of side effects.
pub struct KeyExtractor<T, K> {
    extract: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<T, K> KeyExtractor<T, K> {
    /// Wraps a key function.
    pub fn new<F>(extract: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            extract: Arc::new(extract),
        }
    }

    /// Extracts the key of `tuple`.
    #[inline]
    pub fn key(&self, tuple: &T) -> K {
        (self.extract)(tuple)
    }
}

impl<T, K: Hash> KeyExtractor<T, K> {
    /// Hash of the key of `tuple`.
    #[inline]
    pub fn hash(&self, tuple: &T) -> u64 {
        hash_key(&self.key(tuple))
    }
}

impl<T, K> Clone for KeyExtractor<T, K> {
    fn clone(&self) -> Self {
        Self {
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<T, K> fmt::Debug for KeyExtractor<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyExtractor")
    }
}

/// Deterministic `FxHash` of a key.
#[inline]
#[must_use]
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Reduces a key hash to one of `partitions` partitions.
///
/// # Panics
///
/// Panics if `partitions` is zero.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn partition_of(hash: u64, partitions: usize) -> usize {
    // The result is < partitions, which fits in usize
    (hash % partitions as u64) as usize
}
