//! Punctuation synthesis.
//!
//! A destination that receives no data cannot tell whether its upstream is
//! idle or slow, so its watermark would stall. The emitter samples its input
//! every [`PunctuationPolicy::sample_amount`] tuples; once
//! [`PunctuationPolicy::interval`] has elapsed since the last check, every
//! destination that saw no delivery in between receives a punctuation
//! carrying the current watermark. One envelope is shared by all of them.

use std::time::{Duration, Instant};

use smallvec::SmallVec;

use super::{Emitter, ExecutionMode, Routing};
use crate::alloc::Pooled;
use crate::message::Message;
use crate::Tuple;

/// Inputs between two punctuation checks.
pub const DEFAULT_SAMPLE_AMOUNT: u64 = 64;

/// Minimum wall-clock time between two punctuation rounds.
pub const DEFAULT_PUNCTUATION_INTERVAL: Duration = Duration::from_millis(1);

/// When an emitter synthesizes punctuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunctuationPolicy {
    /// Check every this many received inputs.
    pub sample_amount: u64,
    /// Minimum time between two punctuation rounds.
    pub interval: Duration,
}

impl Default for PunctuationPolicy {
    fn default() -> Self {
        Self {
            sample_amount: DEFAULT_SAMPLE_AMOUNT,
            interval: DEFAULT_PUNCTUATION_INTERVAL,
        }
    }
}

impl PunctuationPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(sample_amount: u64, interval: Duration) -> Self {
        Self {
            sample_amount: sample_amount.max(1),
            interval,
        }
    }
}

impl<T: Tuple> Emitter<T> {
    /// Runs a punctuation round if the sampling point is reached.
    pub(super) fn maybe_punctuate(&mut self, watermark: u64) {
        if self.mode != ExecutionMode::Default || matches!(self.routing, Routing::Broadcast) {
            return;
        }
        if self.received_inputs % self.policy.sample_amount.max(1) == 0 {
            self.generate_punctuation(watermark);
        }
    }

    fn generate_punctuation(&mut self, watermark: u64) {
        if self.last_punctuation.elapsed() < self.policy.interval {
            return;
        }
        let mut idle: SmallVec<[usize; 16]> = SmallVec::new();
        for dest in 0..self.num_dests {
            if self.delivered[dest] == 0 {
                self.dispatch_batch(dest, false);
                idle.push(dest);
            } else {
                self.delivered[dest] = 0;
            }
        }
        // Every destination was busy: check again at the next sample
        if idle.is_empty() {
            return;
        }
        for &dest in &idle {
            self.note_watermark(dest, watermark);
        }
        let punctuation = self.punctuation(watermark);
        self.dispatch_shared(&idle, punctuation);
        self.stats.punctuations += 1;
        self.last_punctuation = Instant::now();
    }

    /// Flushes all partial batches, then sends a punctuation carrying
    /// `watermark` to every destination.
    pub fn propagate_punctuation(&mut self, watermark: u64) {
        self.flush();
        for dest in 0..self.num_dests {
            self.note_watermark(dest, watermark);
        }
        let punctuation = self.punctuation(watermark);
        self.dispatch_to_all(punctuation);
        self.stats.punctuations += 1;
    }

    /// Builds a punctuation envelope of the emitter's delivery kind.
    fn punctuation(&self, watermark: u64) -> Message<T> {
        if self.batch_size == 0 {
            let mut single = self.singles.acquire();
            single.fill_punctuation(watermark, self.num_dests);
            Message::Single(Pooled::new(single, Some(self.singles.clone())))
        } else {
            let mut batch = self.batch_pool.acquire();
            batch.fill_punctuation(watermark, self.num_dests);
            Message::Batch(Pooled::new(batch, Some(self.batch_pool.clone())))
        }
    }
}
