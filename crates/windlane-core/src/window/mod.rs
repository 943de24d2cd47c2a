//! # Windowed Aggregation
//!
//! Count-based and time-based sliding windows, computed by a pool of
//! replicas.
//!
//! ## Window Types
//!
//! - **Count-based (CB)**: window `n` of a key covers that key's tuples with
//!   ordinals `[n * slide, n * slide + length)` and closes once
//!   `n * slide + length` tuples of the key were seen.
//! - **Time-based (TB)**: window `n` covers timestamps
//!   `[n * slide, n * slide + length)` and closes once the watermark reaches
//!   `end + lateness`. Tuples whose windows are all closed are dropped and
//!   counted as ignored.
//!
//! ## Roles
//!
//! Every replica receives the whole input stream (broadcast input routing).
//!
//! - [`WindowRole::Keyed`]: replica `i` of `P` owns the keys with
//!   `hash(key) % P == i` and computes all of their windows.
//! - [`WindowRole::RoundRobin`]: every replica sees every key; replica `i`
//!   computes the windows `n` with `n % P == i` by sliding `slide * P` from
//!   a phase offset of `i * slide`. One hot key is spread over all replicas.
//!
//! ## Aggregation
//!
//! [`WindowFunction::Incremental`] folds each tuple into a running result
//! per window; [`WindowFunction::NonIncremental`] buffers the key's tuples
//! and computes each window over the buffered slice when it closes.

mod assigner;
mod parallel;
mod replica;
mod watermark;


pub use assigner::WindowGeometry;
pub use parallel::{ParallelWindows, ParallelWindowsBuilder};
pub use replica::WindowReplica;
pub use watermark::InputWatermarks;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Keys usable for window partitioning.
///
/// Operators without a key extractor place every tuple under `K::default()`.
pub trait WindowKey: Hash + Eq + Clone + Default + Send + Sync + 'static {}

impl<K: Hash + Eq + Clone + Default + Send + Sync + 'static> WindowKey for K {}

/// Count-based or time-based windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Delimited by per-key tuple counts.
    CountBased,
    /// Delimited by event time.
    TimeBased,
}

/// How window computation is divided between replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowRole {
    /// Replicas own disjoint key sets.
    #[default]
    Keyed,
    /// Replicas own disjoint window indices of every key.
    RoundRobin,
}

/// Window shape and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Count-based or time-based.
    pub window_type: WindowType,
    /// Window length, in tuples or time units.
    pub length: u64,
    /// Distance between consecutive window starts.
    pub slide: u64,
    /// Time-based only: grace period after a window's end.
    pub lateness: u64,
    /// Time-based only: granularity of `length` and `slide`.
    pub quantum: u64,
}

impl WindowSpec {
    /// Count-based windows.
    #[must_use]
    pub fn count_based(length: u64, slide: u64) -> Self {
        Self {
            window_type: WindowType::CountBased,
            length,
            slide,
            lateness: 0,
            quantum: 1,
        }
    }

    /// Time-based windows with no lateness and a unit quantum.
    #[must_use]
    pub fn time_based(length: u64, slide: u64) -> Self {
        Self {
            window_type: WindowType::TimeBased,
            ..Self::count_based(length, slide)
        }
    }

    /// Sets the lateness.
    #[must_use]
    pub fn with_lateness(mut self, lateness: u64) -> Self {
        self.lateness = lateness;
        self
    }

    /// Sets the time quantum.
    #[must_use]
    pub fn with_quantum(mut self, quantum: u64) -> Self {
        self.quantum = quantum;
        self
    }

    /// Returns true for time-based windows.
    #[inline]
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        self.window_type == WindowType::TimeBased
    }
}

type IncrementalFn<T, R> = Arc<dyn Fn(&T, &mut R) + Send + Sync>;
type NonIncrementalFn<T, K, R> = Arc<dyn Fn(&K, u64, u64, &[T], &mut R) + Send + Sync>;

/// Window aggregation logic.
pub enum WindowFunction<T, K, R> {
    /// Folds one tuple into the window's running result.
    Incremental(IncrementalFn<T, R>),
    /// Computes the result from `(key, start, end, tuples)` when the window closes.
    NonIncremental(NonIncrementalFn<T, K, R>),
}

impl<T, K, R> WindowFunction<T, K, R> {
    /// Incremental aggregation.
    pub fn incremental<F>(fold: F) -> Self
    where
        F: Fn(&T, &mut R) + Send + Sync + 'static,
    {
        Self::Incremental(Arc::new(fold))
    }

    /// Non-incremental aggregation over the buffered window content.
    pub fn non_incremental<F>(compute: F) -> Self
    where
        F: Fn(&K, u64, u64, &[T], &mut R) + Send + Sync + 'static,
    {
        Self::NonIncremental(Arc::new(compute))
    }

    /// Returns true for incremental aggregation.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental(_))
    }
}

impl<T, K, R> Clone for WindowFunction<T, K, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Incremental(f) => Self::Incremental(Arc::clone(f)),
            Self::NonIncremental(f) => Self::NonIncremental(Arc::clone(f)),
        }
    }
}

impl<T, K, R> fmt::Debug for WindowFunction<T, K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incremental(_) => f.write_str("Incremental"),
            Self::NonIncremental(_) => f.write_str("NonIncremental"),
        }
    }
}

/// One closed window of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowResult<K, R> {
    /// Key the window belongs to.
    pub key: K,
    /// Global window index, identical whatever the role and parallelism.
    pub index: u64,
    /// First position covered (ordinal or timestamp).
    pub start: u64,
    /// One past the last position covered.
    pub end: u64,
    /// Aggregated value.
    pub value: R,
}

/// Identity of a replica within its operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeContext {
    parallelism: usize,
    replica_index: usize,
}

impl RuntimeContext {
    /// Creates a context for replica `replica_index` of `parallelism`.
    #[must_use]
    pub fn new(parallelism: usize, replica_index: usize) -> Self {
        Self {
            parallelism,
            replica_index,
        }
    }

    /// Number of replicas of the operator.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Index of this replica.
    #[must_use]
    pub fn replica_index(&self) -> usize {
        self.replica_index
    }
}

/// Called once per replica when it terminates.
pub type ClosingHook = Arc<dyn Fn(&RuntimeContext) + Send + Sync>;

/// Per-replica counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    inputs: u64,
    punctuations: u64,
    windows_fired: u64,
    ignored: u64,
}

impl ReplicaStats {
    /// Data tuples received.
    #[must_use]
    pub fn inputs(&self) -> u64 {
        self.inputs
    }

    /// Punctuations received.
    #[must_use]
    pub fn punctuations(&self) -> u64 {
        self.punctuations
    }

    /// Window results emitted.
    #[must_use]
    pub fn windows_fired(&self) -> u64 {
        self.windows_fired
    }

    /// Late tuples dropped.
    #[must_use]
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    pub(crate) fn record_input(&mut self) {
        self.inputs += 1;
    }

    pub(crate) fn record_punctuation(&mut self) {
        self.punctuations += 1;
    }

    pub(crate) fn record_fired(&mut self) {
        self.windows_fired += 1;
    }

    pub(crate) fn record_ignored(&mut self) {
        self.ignored += 1;
    }
}
