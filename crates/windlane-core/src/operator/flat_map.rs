//! Flat-map replica: zero or more outputs per input.

use std::sync::Arc;

use crate::emitter::Emitter;
use crate::message::Message;
use crate::shipper::Shipper;
use crate::window::{InputWatermarks, ReplicaStats, RuntimeContext};
use crate::Tuple;

/// User function of a flat-map operator.
pub type FlatMapFunction<T, U> = Arc<dyn Fn(&T, &mut Shipper<U>) + Send + Sync>;

/// One replica of a flat-map operator.
///
/// Results inherit the timestamp of their input and the replica's current
/// watermark. Punctuations are forwarded to every destination.
pub struct FlatMapReplica<T, U> {
    name: String,
    context: RuntimeContext,
    function: FlatMapFunction<T, U>,
    shipper: Shipper<U>,
    watermarks: InputWatermarks,
    stats: ReplicaStats,
    terminated: bool,
}

impl<T: Tuple, U: Tuple> FlatMapReplica<T, U> {
    /// Creates replica `context.replica_index()` with a single input channel.
    #[must_use]
    pub fn new<F>(
        name: impl Into<String>,
        context: RuntimeContext,
        function: F,
        emitter: Emitter<U>,
    ) -> Self
    where
        F: Fn(&T, &mut Shipper<U>) + Send + Sync + 'static,
    {
        Self::with_function(name, context, Arc::new(function), emitter)
    }

    /// Creates a replica sharing an existing function.
    #[must_use]
    pub fn with_function(
        name: impl Into<String>,
        context: RuntimeContext,
        function: FlatMapFunction<T, U>,
        emitter: Emitter<U>,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            function,
            shipper: Shipper::new(emitter),
            watermarks: InputWatermarks::new(1),
            stats: ReplicaStats::default(),
            terminated: false,
        }
    }

    /// Sets how many upstream channels feed this replica.
    pub fn set_input_channels(&mut self, channels: usize) {
        self.watermarks = InputWatermarks::new(channels);
    }

    /// Handles one message received on `channel`.
    pub fn process(&mut self, channel: usize, message: Message<T>) {
        if self.terminated {
            message.release();
            return;
        }
        match message {
            Message::EndOfStream => {
                if self.watermarks.close(channel) {
                    self.shipper.emitter_mut().terminate();
                    self.terminated = true;
                    tracing::debug!(
                        "FlatMap replica {}[{}] terminated after {} inputs, {} outputs",
                        self.name,
                        self.context.replica_index(),
                        self.stats.inputs(),
                        self.shipper.num_delivered()
                    );
                }
            }
            Message::Single(single) => {
                let watermark = self.watermarks.update(channel, single.watermark());
                if single.is_punctuation() {
                    self.on_punctuation(watermark);
                } else {
                    self.stats.record_input();
                    self.shipper.set_parameters(single.timestamp(), watermark);
                    (self.function)(single.tuple(), &mut self.shipper);
                }
                single.release();
            }
            Message::Batch(batch) => {
                let watermark = self.watermarks.update(channel, batch.watermark());
                if batch.is_punctuation() {
                    self.on_punctuation(watermark);
                } else {
                    for (tuple, timestamp) in batch.iter() {
                        self.stats.record_input();
                        self.shipper.set_parameters(timestamp, watermark);
                        (self.function)(tuple, &mut self.shipper);
                    }
                }
                batch.release();
            }
        }
    }

    fn on_punctuation(&mut self, watermark: u64) {
        self.stats.record_punctuation();
        self.shipper.emitter_mut().propagate_punctuation(watermark);
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

    /// Replica counters.
    #[must_use]
    pub fn stats(&self) -> &ReplicaStats {
        &self.stats
    }

    /// Returns true once end of stream was received on every channel.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// The replica's shipper.
    #[must_use]
    pub fn shipper(&self) -> &Shipper<U> {
        &self.shipper
    }

    /// Mutable access to the replica's shipper.
    pub fn shipper_mut(&mut self) -> &mut Shipper<U> {
        &mut self.shipper
    }
}

impl<T, U> std::fmt::Debug for FlatMapReplica<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatMapReplica")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("stats", &self.stats)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Pooled;
    use crate::message::{Batch, Single};

    fn splitter() -> FlatMapReplica<String, String> {
        FlatMapReplica::new(
            "split",
            RuntimeContext::new(1, 0),
            |line: &String, shipper: &mut Shipper<String>| {
                for word in line.split_whitespace() {
                    shipper.push(word.to_string());
                }
            },
            Emitter::forward(0),
        )
    }

    fn data(line: &str, ts: u64, wm: u64) -> Message<String> {
        Message::Single(Pooled::detached(Single::new(line.to_string(), 0, ts, wm)))
    }

    fn outputs(replica: &mut FlatMapReplica<String, String>) -> Vec<Message<String>> {
        replica
            .shipper_mut()
            .emitter_mut()
            .take_output_queue()
            .into_iter()
            .map(|(message, _)| message)
            .collect()
    }

    #[test]
    fn test_expands_each_input() {
        let mut replica = splitter();
        replica.process(0, data("a b c", 7, 3));
        replica.process(0, data("", 8, 3));
        let out = outputs(&mut replica);
        assert_eq!(out.len(), 3);
        let Message::Single(first) = &out[0] else {
            panic!("expected a single envelope");
        };
        assert_eq!(first.tuple(), "a");
        assert_eq!(first.timestamp(), 7);
        assert_eq!(first.watermark(), 3);
        assert_eq!(replica.stats().inputs(), 2);
        assert_eq!(replica.shipper().num_delivered(), 3);
    }

    #[test]
    fn test_batch_input() {
        let mut replica = splitter();
        let mut batch = Batch::with_capacity(2);
        assert!(batch.push("x y".to_string(), 1, 0));
        assert!(batch.push("z".to_string(), 2, 0));
        replica.process(0, Message::Batch(Pooled::detached(batch)));
        assert_eq!(outputs(&mut replica).len(), 3);
    }

    #[test]
    fn test_forwards_punctuation() {
        let mut replica = splitter();
        replica.process(0, Message::Single(Pooled::detached(Single::punctuation(9, 1))));
        let out = outputs(&mut replica);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_punctuation());
        assert_eq!(out[0].watermark(), Some(9));
        assert_eq!(replica.stats().punctuations(), 1);
    }

    #[test]
    fn test_terminates_after_every_channel() {
        let mut replica = splitter();
        replica.set_input_channels(2);
        replica.process(0, Message::EndOfStream);
        assert!(!replica.is_terminated());
        replica.process(1, data("late", 1, 0));
        replica.process(1, Message::EndOfStream);
        assert!(replica.is_terminated());
        let out = outputs(&mut replica);
        assert!(out.last().is_some_and(Message::is_end_of_stream));
        replica.process(1, data("ignored", 2, 0));
        assert!(outputs(&mut replica).is_empty());
    }
}
