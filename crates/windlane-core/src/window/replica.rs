//! Window replica: per-thread window state and trigger logic.
//!
//! Each key owns a contiguous run of open windows `[next_close, next_open)`
//! in replica-local indices. A tuple is folded into every open window that
//! contains its position, opening windows up to the newest one it touches.
//! Windows close strictly in index order, so results of one key are emitted
//! in non-decreasing window order.
//!
//! Time-based windows are checked against every key whenever the trigger
//! watermark advances, whether it arrives with data or with a punctuation.
//! Windows the trigger already passed are never opened.

use std::collections::VecDeque;

use fxhash::FxHashMap;

use super::{
    ClosingHook, InputWatermarks, ReplicaStats, RuntimeContext, WindowFunction, WindowGeometry,
    WindowKey, WindowResult, WindowRole, WindowSpec, WindowType,
};
use crate::emitter::{hash_key, partition_of, Emitter, ExecutionMode, KeyExtractor};
use crate::message::Message;
use crate::Tuple;

/// One open window of a key.
#[derive(Debug)]
struct Slot<R> {
    value: R,
    max_timestamp: u64,
}

/// Window state of one key.
#[derive(Debug)]
struct KeyState<T, R> {
    /// Tuples of this key observed so far (count-based position)
    count: u64,
    /// Set until the first tuple of the key lands in a window
    fresh: bool,
    /// Oldest window not yet emitted
    next_close: u64,
    /// One past the newest opened window
    next_open: u64,
    slots: VecDeque<Slot<R>>,
    /// Non-incremental only: buffered positions, sorted
    positions: VecDeque<u64>,
    /// Non-incremental only: tuples parallel to `positions`
    archive: VecDeque<T>,
}

impl<T, R> KeyState<T, R> {
    fn new() -> Self {
        Self {
            count: 0,
            fresh: true,
            next_close: 0,
            next_open: 0,
            slots: VecDeque::new(),
            positions: VecDeque::new(),
            archive: VecDeque::new(),
        }
    }

    fn archive(&mut self, position: u64, tuple: T) {
        let at = self.positions.partition_point(|&p| p <= position);
        self.positions.insert(at, position);
        self.archive.insert(at, tuple);
    }

    fn retire_before(&mut self, horizon: u64) {
        while self.positions.front().is_some_and(|&p| p < horizon) {
            self.positions.pop_front();
            self.archive.pop_front();
        }
    }
}

/// Everything needed to close windows, borrowed from the replica.
struct Closer<'a, T, K, R> {
    geometry: WindowGeometry,
    window_type: WindowType,
    lateness: u64,
    trigger_watermark: u64,
    output_watermark: u64,
    function: &'a WindowFunction<T, K, R>,
    emitter: &'a mut Emitter<WindowResult<K, R>>,
    stats: &'a mut ReplicaStats,
}

impl<T: Tuple, K: WindowKey, R: Tuple> Closer<'_, T, K, R> {
    fn closable(&self, state: &KeyState<T, R>, m: u64) -> bool {
        match self.window_type {
            WindowType::CountBased => self.geometry.end(m) <= state.count,
            WindowType::TimeBased => {
                self.geometry.end(m).saturating_add(self.lateness) <= self.trigger_watermark
            }
        }
    }

    /// Emits the key's closable windows in order; `force` closes all of them.
    fn close(&mut self, key: &K, state: &mut KeyState<T, R>, force: bool) {
        while state.next_close < state.next_open && (force || self.closable(state, state.next_close))
        {
            let m = state.next_close;
            let Some(slot) = state.slots.pop_front() else {
                break;
            };
            let start = self.geometry.start(m);
            let end = self.geometry.end(m);
            let mut value = slot.value;
            if let WindowFunction::NonIncremental(compute) = self.function {
                let from = state.positions.partition_point(|&p| p < start);
                let to = state.positions.partition_point(|&p| p < end);
                let tuples = state.archive.make_contiguous();
                compute(key, start, end, &tuples[from..to], &mut value);
            }
            state.next_close += 1;
            state.retire_before(self.geometry.start(state.next_close));

            let timestamp = match self.window_type {
                WindowType::TimeBased => end.saturating_sub(1),
                WindowType::CountBased => slot.max_timestamp,
            };
            let index = self.geometry.global_index(m);
            let result = WindowResult {
                key: key.clone(),
                index,
                start,
                end,
                value,
            };
            self.emitter
                .emit(result, index, timestamp, self.output_watermark);
            self.stats.record_fired();
        }
    }
}

/// One replica of a parallel window operator.
///
/// Replicas are driven by [`process`](Self::process) with the messages of
/// their inlet; the convenience methods [`push`](Self::push),
/// [`advance_watermark`](Self::advance_watermark) and
/// [`end_of_stream`](Self::end_of_stream) feed channel 0 directly.
pub struct WindowReplica<T, K, R> {
    name: String,
    context: RuntimeContext,
    spec: WindowSpec,
    role: WindowRole,
    geometry: WindowGeometry,
    function: WindowFunction<T, K, R>,
    extractor: Option<KeyExtractor<T, K>>,
    keys: FxHashMap<K, KeyState<T, R>>,
    watermarks: InputWatermarks,
    /// Largest timestamp seen (deterministic trigger)
    max_timestamp: u64,
    /// Trigger watermark of the last sweep over every key
    swept_watermark: u64,
    mode: ExecutionMode,
    emitter: Emitter<WindowResult<K, R>>,
    closing: Option<ClosingHook>,
    stats: ReplicaStats,
    terminated: bool,
}

impl<T: Tuple, K: WindowKey, R: Tuple> WindowReplica<T, K, R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        context: RuntimeContext,
        spec: WindowSpec,
        role: WindowRole,
        function: WindowFunction<T, K, R>,
        extractor: Option<KeyExtractor<T, K>>,
        emitter: Emitter<WindowResult<K, R>>,
        closing: Option<ClosingHook>,
    ) -> Self {
        let geometry =
            WindowGeometry::new(&spec, role, context.parallelism(), context.replica_index());
        Self {
            name,
            context,
            spec,
            role,
            geometry,
            function,
            extractor,
            keys: FxHashMap::default(),
            watermarks: InputWatermarks::new(1),
            max_timestamp: 0,
            swept_watermark: 0,
            mode: ExecutionMode::Default,
            emitter,
            closing,
            stats: ReplicaStats::default(),
            terminated: false,
        }
    }

    /// Handles one message received on `channel`.
    pub fn process(&mut self, channel: usize, message: Message<T>) {
        if self.terminated {
            message.release();
            return;
        }
        match message {
            Message::EndOfStream => self.end_of_stream(channel),
            Message::Single(mut single) => {
                self.watermarks.update(channel, single.watermark());
                if single.is_punctuation() {
                    single.release();
                    self.on_punctuation();
                } else {
                    let timestamp = single.timestamp();
                    let tuple = match single.get_mut() {
                        Some(owned) => std::mem::take(owned.tuple_mut()),
                        None => single.tuple().clone(),
                    };
                    single.release();
                    self.process_tuple(tuple, timestamp);
                }
            }
            Message::Batch(mut batch) => {
                self.watermarks.update(channel, batch.watermark());
                if batch.is_punctuation() {
                    batch.release();
                    self.on_punctuation();
                } else {
                    if let Some(owned) = batch.get_mut() {
                        for (tuple, timestamp) in owned.drain() {
                            self.process_tuple(tuple, timestamp);
                        }
                    } else {
                        for (tuple, timestamp) in batch.iter() {
                            self.process_tuple(tuple.clone(), timestamp);
                        }
                    }
                    batch.release();
                }
            }
        }
    }

    /// Feeds one tuple on channel 0.
    pub fn push(&mut self, tuple: T, timestamp: u64, watermark: u64) {
        if self.terminated {
            return;
        }
        self.watermarks.update(0, watermark);
        self.process_tuple(tuple, timestamp);
    }

    /// Advances channel 0 to `watermark` as a punctuation would.
    pub fn advance_watermark(&mut self, watermark: u64) {
        if self.terminated {
            return;
        }
        self.watermarks.update(0, watermark);
        self.on_punctuation();
    }

    /// Records end of stream on `channel`.
    ///
    /// Once every channel finished, all open windows fire (partial windows
    /// included), the emitter is flushed and terminated, and the closing
    /// hook runs.
    pub fn end_of_stream(&mut self, channel: usize) {
        if self.terminated || !self.watermarks.close(channel) {
            return;
        }
        self.close_windows(None, true);
        self.emitter.terminate();
        if let Some(hook) = &self.closing {
            hook(&self.context);
        }
        self.terminated = true;
        tracing::info!(
            "Window replica {}[{}/{}] terminated: {} inputs, {} windows, {} ignored",
            self.name,
            self.context.replica_index(),
            self.context.parallelism(),
            self.stats.inputs(),
            self.stats.windows_fired(),
            self.stats.ignored()
        );
    }

    fn on_punctuation(&mut self) {
        self.stats.record_punctuation();
        if self.spec.is_time_based() {
            self.close_windows(None, false);
        }
        self.emitter
            .propagate_punctuation(self.watermarks.current());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn process_tuple(&mut self, tuple: T, timestamp: u64) {
        self.stats.record_input();
        self.max_timestamp = self.max_timestamp.max(timestamp);
        let time_based = self.spec.is_time_based();
        if time_based && self.trigger_watermark() > self.swept_watermark {
            self.close_windows(None, false);
        }

        let key = match &self.extractor {
            Some(extractor) => extractor.key(&tuple),
            None => K::default(),
        };
        let parallelism = self.context.parallelism();
        if self.role == WindowRole::Keyed
            && parallelism > 1
            && partition_of(hash_key(&key), parallelism) != self.context.replica_index()
        {
            return;
        }

        let trigger_watermark = self.trigger_watermark();
        let lateness = self.lateness();
        let geometry = self.geometry;
        let incremental = match &self.function {
            WindowFunction::Incremental(fold) => Some(fold),
            WindowFunction::NonIncremental(_) => None,
        };

        let state = self.keys.entry(key.clone()).or_insert_with(KeyState::new);
        let position = if time_based {
            timestamp
        } else {
            state.count += 1;
            state.count - 1
        };
        let Some((first, last)) = geometry.windows_of(position) else {
            return;
        };

        if time_based
            && ((!state.fresh && last < state.next_close)
                || geometry.end(last).saturating_add(lateness) <= trigger_watermark)
        {
            self.stats.record_ignored();
            tracing::debug!(
                "Window replica {}[{}]: dropped late tuple at {timestamp} (watermark {trigger_watermark})",
                self.name,
                self.context.replica_index()
            );
            return;
        }

        if state.fresh {
            state.fresh = false;
            state.next_close = first;
            state.next_open = first;
        }
        if time_based && state.next_close == state.next_open {
            // Windows the trigger already passed are never opened
            let floor = geometry.first_ending_after(trigger_watermark.saturating_sub(lateness));
            if floor > state.next_open {
                state.next_close = floor;
                state.next_open = floor;
                state.retire_before(geometry.start(floor));
            }
        }
        while state.next_open <= last {
            state.slots.push_back(Slot {
                value: R::default(),
                max_timestamp: 0,
            });
            state.next_open += 1;
        }
        for m in first.max(state.next_close)..=last {
            // Slots cover [next_close, next_open), so the offset is in bounds
            let slot = &mut state.slots[(m - state.next_close) as usize];
            slot.max_timestamp = slot.max_timestamp.max(timestamp);
            if let Some(fold) = incremental {
                fold(&tuple, &mut slot.value);
            }
        }
        if incremental.is_none() {
            state.archive(position, tuple);
        }

        self.close_windows(Some(&key), false);
    }

    /// Closes windows of one key, or of every key when `key` is `None`.
    fn close_windows(&mut self, key: Option<&K>, force: bool) {
        let trigger_watermark = self.trigger_watermark();
        let lateness = self.lateness();
        let output_watermark = self.watermarks.current();
        if key.is_none() {
            self.swept_watermark = trigger_watermark;
        }
        let Self {
            keys,
            geometry,
            spec,
            function,
            emitter,
            stats,
            ..
        } = self;
        let mut closer = Closer {
            geometry: *geometry,
            window_type: spec.window_type,
            lateness,
            trigger_watermark,
            output_watermark,
            function,
            emitter,
            stats,
        };
        match key {
            Some(key) => {
                if let Some(state) = keys.get_mut(key) {
                    closer.close(key, state, force);
                }
            }
            None => {
                for (key, state) in keys.iter_mut() {
                    closer.close(key, state, force);
                }
            }
        }
    }

    fn trigger_watermark(&self) -> u64 {
        match self.mode {
            ExecutionMode::Default => self.watermarks.current(),
            ExecutionMode::Deterministic => self.max_timestamp,
        }
    }

    fn lateness(&self) -> u64 {
        match self.mode {
            ExecutionMode::Default => self.spec.lateness,
            ExecutionMode::Deterministic => 0,
        }
    }

    /// Sets how many upstream channels feed this replica.
    ///
    /// End of stream must arrive on every channel before the replica terminates.
    pub fn set_input_channels(&mut self, channels: usize) {
        self.watermarks = InputWatermarks::new(channels);
    }

    /// Replaces the output emitter.
    pub fn set_emitter(&mut self, mut emitter: Emitter<WindowResult<K, R>>) {
        emitter.set_execution_mode(self.mode);
        self.emitter = emitter;
    }

    /// Sets the execution mode of the replica and its emitter.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
        self.emitter.set_execution_mode(mode);
    }

    /// Operator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replica identity.
    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Replica-local window geometry.
    #[must_use]
    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    /// Replica counters.
    #[must_use]
    pub fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    /// Late tuples dropped by this replica.
    #[must_use]
    pub fn num_ignored_tuples(&self) -> u64 {
        self.stats.ignored()
    }

    /// Number of keys with window state.
    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Current input watermark.
    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermarks.current()
    }

    /// Returns true once end of stream was processed on every channel.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The output emitter.
    #[must_use]
    pub fn emitter(&self) -> &Emitter<WindowResult<K, R>> {
        &self.emitter
    }

    /// Mutable access to the output emitter.
    pub fn emitter_mut(&mut self) -> &mut Emitter<WindowResult<K, R>> {
        &mut self.emitter
    }
}

impl<T, K, R> std::fmt::Debug for WindowReplica<T, K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowReplica")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("spec", &self.spec)
            .field("role", &self.role)
            .field("keys", &self.keys.len())
            .field("watermark", &self.watermarks.current())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
