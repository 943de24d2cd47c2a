//! # Shipper
//!
//! Output handle given to user functions that produce any number of results
//! per input (flat-map style). Results inherit the timestamp and watermark
//! of the input being processed, which the owning replica installs with
//! [`Shipper::set_parameters`] before each call.

use crate::emitter::Emitter;
use crate::Tuple;

/// Pushes user results through the replica's emitter.
#[derive(Debug)]
pub struct Shipper<T> {
    emitter: Emitter<T>,
    delivered: u64,
    timestamp: u64,
    watermark: u64,
}

impl<T: Tuple> Shipper<T> {
    /// Wraps `emitter`.
    #[must_use]
    pub fn new(emitter: Emitter<T>) -> Self {
        Self {
            emitter,
            delivered: 0,
            timestamp: 0,
            watermark: 0,
        }
    }

    /// Sets the timestamp and watermark of subsequent pushes.
    #[inline]
    pub fn set_parameters(&mut self, timestamp: u64, watermark: u64) {
        self.timestamp = timestamp;
        self.watermark = watermark;
    }

    /// Emits one result.
    pub fn push(&mut self, value: T) {
        self.emitter.emit(value, 0, self.timestamp, self.watermark);
        self.delivered += 1;
    }

    /// Emits a copy of `value`.
    pub fn push_ref(&mut self, value: &T) {
        self.push(value.clone());
    }

    /// Dispatches partial batches.
    pub fn flush(&mut self) {
        self.emitter.flush();
    }

    /// Results pushed so far.
    #[must_use]
    pub fn num_delivered(&self) -> u64 {
        self.delivered
    }

    /// Current timestamp applied to pushes.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Current watermark applied to pushes.
    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// The wrapped emitter.
    #[must_use]
    pub fn emitter(&self) -> &Emitter<T> {
        &self.emitter
    }

    /// Mutable access to the wrapped emitter.
    pub fn emitter_mut(&mut self) -> &mut Emitter<T> {
        &mut self.emitter
    }

    /// Unwraps the emitter.
    #[must_use]
    pub fn into_emitter(self) -> Emitter<T> {
        self.emitter
    }
}

impl<T: Tuple> Clone for Shipper<T> {
    /// Clones the emitter configuration; the delivered count starts over.
    fn clone(&self) -> Self {
        Self {
            emitter: self.emitter.clone(),
            delivered: 0,
            timestamp: self.timestamp,
            watermark: self.watermark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn values(shipper: &mut Shipper<u32>) -> Vec<(u32, u64, u64)> {
        let mut out = Vec::new();
        for (message, _) in shipper.emitter_mut().take_output_queue() {
            if let Message::Single(single) = &message {
                if !single.is_punctuation() {
                    out.push((*single.tuple(), single.timestamp(), single.watermark()));
                }
            }
            message.release();
        }
        out
    }

    #[test]
    fn test_push_inherits_parameters() {
        let mut shipper = Shipper::new(Emitter::forward(0));
        shipper.set_parameters(10, 4);
        shipper.push(1);
        shipper.push_ref(&2);
        shipper.set_parameters(12, 6);
        shipper.push(3);
        assert_eq!(shipper.num_delivered(), 3);
        assert_eq!(values(&mut shipper), vec![(1, 10, 4), (2, 10, 4), (3, 12, 6)]);
    }

    #[test]
    fn test_flush_dispatches_partial_batch() {
        let mut shipper = Shipper::new(Emitter::forward(8));
        shipper.push(1);
        shipper.push(2);
        assert!(shipper.emitter().output_queue().is_empty());
        shipper.flush();
        let queue = shipper.emitter_mut().take_output_queue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].0.num_tuples(), 2);
        for (message, _) in queue {
            message.release();
        }
    }

    #[test]
    fn test_clone_resets_count() {
        let mut shipper = Shipper::new(Emitter::forward(0));
        shipper.set_parameters(5, 5);
        shipper.push(1);
        let mut copy = shipper.clone();
        assert_eq!(copy.num_delivered(), 0);
        assert_eq!(copy.timestamp(), 5);
        copy.push(2);
        assert_eq!(values(&mut copy), vec![(2, 5, 5)]);
        assert_eq!(values(&mut shipper), vec![(1, 5, 5)]);
    }
}
