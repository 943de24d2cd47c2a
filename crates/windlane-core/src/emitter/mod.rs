//! # Emitters
//!
//! Routing of an operator replica's output to the replicas of the next
//! operator.
//!
//! An [`Emitter`] owns everything on the producing side of a replica's
//! output: the routing decision, in-flight batches, envelope pools,
//! per-destination delivery counters and the last watermark sent to each
//! destination. It is private to the replica thread and needs no locking.
//!
//! ## Routing
//!
//! | Mode | Destination |
//! |------|-------------|
//! | Keyed | `hash(key) % D` |
//! | Broadcast | every destination, one shared envelope |
//! | Round-robin | `counter % D` |
//! | Forward | destination 0 (`D = 1`) |
//!
//! ## Delivery
//!
//! With `batch_size = 0` every tuple travels in its own [`Single`]
//! envelope. With `batch_size = N` tuples accumulate in one in-flight
//! [`Batch`] per destination that is dispatched when it holds `N` tuples.
//!
//! ## Progress
//!
//! Every `sample_amount` inputs the emitter checks whether the punctuation
//! interval elapsed; if so, destinations that received nothing since the
//! previous check get a shared punctuation carrying the current watermark.
//! See [`PunctuationPolicy`].
//!
//! ## Tree Mode
//!
//! In tree mode, or while no [`Outlet`] is connected, dispatched messages
//! are appended to an output queue of `(message, destination)` pairs
//! instead of being sent.

mod key;
mod punctuation;

#[cfg(test)]
mod tests;

pub use key::{hash_key, partition_of, KeyExtractor};
pub use punctuation::{PunctuationPolicy, DEFAULT_PUNCTUATION_INTERVAL, DEFAULT_SAMPLE_AMOUNT};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::alloc::{Pooled, Recycler};
use crate::channel::Outlet;
use crate::message::{Batch, Message, Single};
use crate::Tuple;

/// Progress semantics of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Watermarks advance with data and with synthesized punctuations.
    #[default]
    Default,
    /// No punctuations are synthesized; time-based windows trigger on the
    /// largest timestamp seen instead of the watermark.
    Deterministic,
}

/// Routing strategy of an emitter or of an operator's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Single destination.
    Forward,
    /// Partitioned by key hash.
    Keyed,
    /// Every destination receives every tuple.
    Broadcast,
    /// Destinations in turn.
    RoundRobin,
}

type KeyHash<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

enum Routing<T> {
    Keyed(KeyHash<T>),
    Broadcast,
    RoundRobin { next: usize },
    Forward,
}

impl<T> Clone for Routing<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Keyed(hash) => Self::Keyed(Arc::clone(hash)),
            Self::Broadcast => Self::Broadcast,
            Self::RoundRobin { next } => Self::RoundRobin { next: *next },
            Self::Forward => Self::Forward,
        }
    }
}

/// Counters kept by an emitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Messages handed to the outlet or the output queue (one per destination).
    pub messages: u64,
    /// Punctuation envelopes built.
    pub punctuations: u64,
}

/// Output side of an operator replica.
pub struct Emitter<T> {
    routing: Routing<T>,
    num_dests: usize,
    /// 0 selects per-tuple delivery
    batch_size: usize,
    tree_mode: bool,
    mode: ExecutionMode,
    policy: PunctuationPolicy,
    outlet: Option<Outlet<T>>,
    output_queue: Vec<(Message<T>, usize)>,
    /// In-flight batch per destination (a single slot when broadcasting)
    batches: Vec<Option<Batch<T>>>,
    singles: Recycler<Single<T>>,
    batch_pool: Recycler<Batch<T>>,
    /// Deliveries per destination since the last punctuation check
    delivered: Vec<u64>,
    received_inputs: u64,
    last_sent_wms: Vec<u64>,
    last_punctuation: Instant,
    stats: EmitterStats,
}

impl<T: Tuple> Emitter<T> {
    /// Creates an emitter partitioning tuples by key over `num_dests` destinations.
    ///
    /// # Panics
    ///
    /// Panics if `num_dests` is zero.
    #[must_use]
    pub fn keyed<K>(extractor: KeyExtractor<T, K>, num_dests: usize, batch_size: usize) -> Self
    where
        K: Hash + 'static,
    {
        let hash: KeyHash<T> = Arc::new(move |tuple: &T| extractor.hash(tuple));
        Self::with_routing(Routing::Keyed(hash), num_dests, batch_size)
    }

    /// Creates an emitter delivering every tuple to all `num_dests` destinations.
    ///
    /// # Panics
    ///
    /// Panics if `num_dests` is zero.
    #[must_use]
    pub fn broadcast(num_dests: usize, batch_size: usize) -> Self {
        Self::with_routing(Routing::Broadcast, num_dests, batch_size)
    }

    /// Creates an emitter cycling over `num_dests` destinations.
    ///
    /// # Panics
    ///
    /// Panics if `num_dests` is zero.
    #[must_use]
    pub fn round_robin(num_dests: usize, batch_size: usize) -> Self {
        Self::with_routing(Routing::RoundRobin { next: 0 }, num_dests, batch_size)
    }

    /// Creates an emitter with a single destination.
    #[must_use]
    pub fn forward(batch_size: usize) -> Self {
        Self::with_routing(Routing::Forward, 1, batch_size)
    }

    fn with_routing(routing: Routing<T>, num_dests: usize, batch_size: usize) -> Self {
        assert!(num_dests > 0, "an emitter needs at least one destination");
        let slots = if matches!(routing, Routing::Broadcast) {
            1
        } else {
            num_dests
        };
        Self {
            routing,
            num_dests,
            batch_size,
            tree_mode: false,
            mode: ExecutionMode::Default,
            policy: PunctuationPolicy::default(),
            outlet: None,
            output_queue: Vec::new(),
            batches: (0..slots).map(|_| None).collect(),
            singles: Recycler::default(),
            batch_pool: Recycler::default(),
            delivered: vec![0; num_dests],
            received_inputs: 0,
            last_sent_wms: vec![0; num_dests],
            last_punctuation: Instant::now(),
            stats: EmitterStats::default(),
        }
    }

    /// Replaces the punctuation policy.
    #[must_use]
    pub fn with_punctuation_policy(mut self, policy: PunctuationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attaches the lanes to the destinations.
    ///
    /// # Panics
    ///
    /// Panics if the outlet does not reach exactly `num_destinations()` destinations.
    pub fn connect(&mut self, outlet: Outlet<T>) {
        assert_eq!(
            outlet.num_destinations(),
            self.num_dests,
            "outlet width must match the emitter's destination count"
        );
        self.outlet = Some(outlet);
    }

    /// Returns true once an outlet is attached.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outlet.is_some()
    }

    /// Number of destinations.
    #[inline]
    #[must_use]
    pub fn num_destinations(&self) -> usize {
        self.num_dests
    }

    /// Target batch size, 0 for per-tuple delivery.
    #[inline]
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Routing strategy.
    #[must_use]
    pub fn routing_mode(&self) -> RoutingMode {
        match self.routing {
            Routing::Keyed(_) => RoutingMode::Keyed,
            Routing::Broadcast => RoutingMode::Broadcast,
            Routing::RoundRobin { .. } => RoutingMode::RoundRobin,
            Routing::Forward => RoutingMode::Forward,
        }
    }

    /// Enables or disables tree mode.
    pub fn set_tree_mode(&mut self, tree_mode: bool) {
        self.tree_mode = tree_mode;
    }

    /// Returns true in tree mode.
    #[must_use]
    pub fn is_tree_mode(&self) -> bool {
        self.tree_mode
    }

    /// Sets the execution mode; punctuations are synthesized only in
    /// [`ExecutionMode::Default`].
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    /// Current execution mode.
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Buffered `(message, destination)` pairs.
    #[must_use]
    pub fn output_queue(&self) -> &[(Message<T>, usize)] {
        &self.output_queue
    }

    /// Takes the buffered `(message, destination)` pairs, leaving the queue empty.
    pub fn take_output_queue(&mut self) -> Vec<(Message<T>, usize)> {
        std::mem::take(&mut self.output_queue)
    }

    /// Inputs received since construction.
    #[must_use]
    pub fn received_inputs(&self) -> u64 {
        self.received_inputs
    }

    /// Last watermark sent to `dest`.
    #[must_use]
    pub fn last_sent_watermark(&self, dest: usize) -> u64 {
        self.last_sent_wms[dest]
    }

    /// Tuples waiting in partial batches.
    #[must_use]
    pub fn pending_tuples(&self) -> usize {
        self.batches.iter().flatten().map(Batch::len).sum()
    }

    /// Emitter counters.
    #[must_use]
    pub fn stats(&self) -> EmitterStats {
        self.stats
    }

    /// Routes one tuple.
    pub fn emit(&mut self, tuple: T, id: u64, timestamp: u64, watermark: u64) {
        self.received_inputs += 1;
        self.maybe_punctuate(watermark);
        match self.route(&tuple) {
            Some(dest) => self.deliver(dest, tuple, id, timestamp, watermark),
            None => self.deliver_to_all(tuple, id, timestamp, watermark),
        }
    }

    /// Routes a received envelope, reusing it when delivering per tuple.
    ///
    /// In batched mode the tuple is moved out of the envelope (copied if the
    /// envelope is shared) and the envelope is released.
    pub fn emit_inplace(&mut self, mut single: Pooled<Single<T>>) {
        let watermark = single.watermark();
        if single.is_punctuation() {
            single.release();
            self.propagate_punctuation(watermark);
            return;
        }
        if self.batch_size > 0 {
            let (id, timestamp) = (single.id(), single.timestamp());
            let tuple = match single.get_mut() {
                Some(owned) => std::mem::take(owned.tuple_mut()),
                None => single.tuple().clone(),
            };
            single.release();
            self.emit(tuple, id, timestamp, watermark);
            return;
        }

        self.received_inputs += 1;
        self.maybe_punctuate(watermark);
        match self.route(single.tuple()) {
            Some(dest) => {
                self.note_watermark(dest, watermark);
                self.dispatch(dest, Message::Single(single));
                self.delivered[dest] += 1;
            }
            None => {
                for dest in 0..self.num_dests {
                    self.note_watermark(dest, watermark);
                    self.delivered[dest] += 1;
                }
                self.dispatch_to_all(Message::Single(single));
            }
        }
    }

    /// Dispatches every non-empty partial batch.
    pub fn flush(&mut self) {
        for slot in 0..self.batches.len() {
            self.dispatch_batch(slot, true);
        }
    }

    /// Flushes, then sends end of stream to every destination.
    pub fn terminate(&mut self) {
        self.flush();
        for dest in 0..self.num_dests {
            self.dispatch(dest, Message::EndOfStream);
        }
        tracing::debug!(
            "Emitter terminated after {} inputs, {} messages, {} punctuations",
            self.received_inputs,
            self.stats.messages,
            self.stats.punctuations
        );
    }

    fn route(&mut self, tuple: &T) -> Option<usize> {
        match &mut self.routing {
            Routing::Keyed(hash) => Some(partition_of(hash(tuple), self.num_dests)),
            Routing::RoundRobin { next } => {
                let dest = *next;
                *next = (dest + 1) % self.num_dests;
                Some(dest)
            }
            Routing::Forward => Some(0),
            Routing::Broadcast => None,
        }
    }

    fn deliver(&mut self, dest: usize, tuple: T, id: u64, timestamp: u64, watermark: u64) {
        self.note_watermark(dest, watermark);
        if self.batch_size == 0 {
            let message = self.single(tuple, id, timestamp, watermark);
            self.dispatch(dest, message);
            self.delivered[dest] += 1;
        } else if self.append(dest, tuple, timestamp, watermark) {
            self.dispatch_batch(dest, true);
        }
    }

    fn deliver_to_all(&mut self, tuple: T, id: u64, timestamp: u64, watermark: u64) {
        for dest in 0..self.num_dests {
            self.note_watermark(dest, watermark);
        }
        if self.batch_size == 0 {
            let message = self.single(tuple, id, timestamp, watermark);
            self.dispatch_to_all(message);
            for count in &mut self.delivered {
                *count += 1;
            }
        } else if self.append(0, tuple, timestamp, watermark) {
            self.dispatch_batch(0, true);
        }
    }

    fn single(&self, tuple: T, id: u64, timestamp: u64, watermark: u64) -> Message<T> {
        let mut single = self.singles.acquire();
        single.fill(tuple, id, timestamp, watermark);
        Message::Single(Pooled::new(single, Some(self.singles.clone())))
    }

    /// Appends to the in-flight batch of `slot`; returns true once it is full.
    fn append(&mut self, slot: usize, tuple: T, timestamp: u64, watermark: u64) -> bool {
        let batch_size = self.batch_size;
        let pool = &self.batch_pool;
        let batch = self.batches[slot].get_or_insert_with(|| {
            let mut batch = pool.acquire();
            batch.set_capacity(batch_size);
            batch
        });
        batch.push(tuple, timestamp, watermark);
        batch.is_full()
    }

    /// Sends the in-flight batch of `slot`, if any.
    ///
    /// `count_delivery` is false when the batch goes out ahead of a
    /// punctuation, which already accounts for the destination.
    fn dispatch_batch(&mut self, slot: usize, count_delivery: bool) {
        let Some(batch) = self.batches[slot].take() else {
            return;
        };
        if batch.is_empty() {
            self.batch_pool.recycle(batch);
            return;
        }
        let message = Message::Batch(Pooled::new(batch, Some(self.batch_pool.clone())));
        if matches!(self.routing, Routing::Broadcast) {
            self.dispatch_to_all(message);
            if count_delivery {
                for count in &mut self.delivered {
                    *count += 1;
                }
            }
        } else {
            self.dispatch(slot, message);
            if count_delivery {
                self.delivered[slot] += 1;
            }
        }
    }

    fn dispatch(&mut self, dest: usize, message: Message<T>) {
        self.stats.messages += 1;
        if self.tree_mode {
            self.output_queue.push((message, dest));
        } else if let Some(outlet) = self.outlet.as_mut() {
            outlet.send(dest, message);
        } else {
            self.output_queue.push((message, dest));
        }
    }

    /// Shares one envelope with the given destinations.
    fn dispatch_shared(&mut self, dests: &[usize], message: Message<T>) {
        match dests.split_last() {
            Some((&last, rest)) => {
                for &dest in rest {
                    self.dispatch(dest, message.clone());
                }
                self.dispatch(last, message);
            }
            None => {
                message.release();
            }
        }
    }

    fn dispatch_to_all(&mut self, message: Message<T>) {
        for dest in 0..self.num_dests - 1 {
            self.dispatch(dest, message.clone());
        }
        self.dispatch(self.num_dests - 1, message);
    }

    #[inline]
    fn note_watermark(&mut self, dest: usize, watermark: u64) {
        debug_assert!(
            watermark >= self.last_sent_wms[dest],
            "watermark regression on destination {dest}: {watermark} < {}",
            self.last_sent_wms[dest]
        );
        self.last_sent_wms[dest] = watermark;
    }
}

impl<T: Tuple> Clone for Emitter<T> {
    /// Copies routing, configuration and counters.
    ///
    /// The clone starts with its own pools, an empty output queue, no
    /// in-flight batches and no outlet.
    fn clone(&self) -> Self {
        Self {
            routing: self.routing.clone(),
            num_dests: self.num_dests,
            batch_size: self.batch_size,
            tree_mode: self.tree_mode,
            mode: self.mode,
            policy: self.policy,
            outlet: None,
            output_queue: Vec::new(),
            batches: (0..self.batches.len()).map(|_| None).collect(),
            singles: Recycler::default(),
            batch_pool: Recycler::default(),
            delivered: self.delivered.clone(),
            received_inputs: self.received_inputs,
            last_sent_wms: self.last_sent_wms.clone(),
            last_punctuation: self.last_punctuation,
            stats: EmitterStats::default(),
        }
    }
}

impl<T> Drop for Emitter<T> {
    fn drop(&mut self) {
        let pending: usize = self.batches.iter().flatten().map(Batch::len).sum();
        if pending > 0 {
            tracing::warn!("Emitter dropped with {pending} tuples in unflushed batches");
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("num_dests", &self.num_dests)
            .field("batch_size", &self.batch_size)
            .field("tree_mode", &self.tree_mode)
            .field("mode", &self.mode)
            .field("connected", &self.outlet.is_some())
            .field("queued", &self.output_queue.len())
            .field("received_inputs", &self.received_inputs)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
