//! # Messages
//!
//! Envelopes exchanged between replicas.
//!
//! Every [`Message`] travels on one SPSC lane. Data and punctuations are
//! wrapped in [`Pooled`] handles so that one physical envelope can be
//! delivered to several destinations and recycled when the last of them is
//! done with it.

mod batch;
mod single;

pub use batch::Batch;
pub use single::Single;

use crate::alloc::Pooled;

/// A message on a lane between two replicas.
#[derive(Debug)]
pub enum Message<T> {
    /// One tuple, or a single-tuple punctuation.
    Single(Pooled<Single<T>>),
    /// Several tuples, or a batch punctuation.
    Batch(Pooled<Batch<T>>),
    /// The producer on this lane will send nothing more.
    EndOfStream,
}

impl<T> Message<T> {
    /// Returns true for punctuations.
    #[must_use]
    pub fn is_punctuation(&self) -> bool {
        match self {
            Self::Single(s) => s.is_punctuation(),
            Self::Batch(b) => b.is_punctuation(),
            Self::EndOfStream => false,
        }
    }

    /// Returns true for the end-of-stream marker.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Watermark carried by the message, `None` for end of stream.
    #[must_use]
    pub fn watermark(&self) -> Option<u64> {
        match self {
            Self::Single(s) => Some(s.watermark()),
            Self::Batch(b) => Some(b.watermark()),
            Self::EndOfStream => None,
        }
    }

    /// Number of data tuples carried (zero for punctuations and end of stream).
    #[must_use]
    pub fn num_tuples(&self) -> usize {
        match self {
            Self::Single(s) if !s.is_punctuation() => 1,
            Self::Batch(b) if !b.is_punctuation() => b.len(),
            _ => 0,
        }
    }
}

impl<T: Default> Message<T> {
    /// Releases the envelope reference held by this message.
    ///
    /// Returns `true` if this was the last reference.
    pub fn release(self) -> bool {
        match self {
            Self::Single(s) => s.release(),
            Self::Batch(b) => b.release(),
            Self::EndOfStream => true,
        }
    }
}

impl<T> Clone for Message<T> {
    /// Shares the underlying envelope.
    fn clone(&self) -> Self {
        match self {
            Self::Single(s) => Self::Single(s.clone()),
            Self::Batch(b) => Self::Batch(b.clone()),
            Self::EndOfStream => Self::EndOfStream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Recycler;

    #[test]
    fn test_message_accessors() {
        let single = Message::Single(Pooled::detached(Single::new(5u32, 0, 10, 8)));
        assert_eq!(single.watermark(), Some(8));
        assert_eq!(single.num_tuples(), 1);
        assert!(!single.is_punctuation());

        let punct: Message<u32> = Message::Batch(Pooled::detached(Batch::punctuation(3, 2)));
        assert!(punct.is_punctuation());
        assert_eq!(punct.num_tuples(), 0);

        let eos: Message<u32> = Message::EndOfStream;
        assert!(eos.is_end_of_stream());
        assert_eq!(eos.watermark(), None);
    }

    #[test]
    fn test_shared_punctuation_released_once() {
        let recycler: Recycler<Single<u32>> = Recycler::new(8);
        let msg = Message::Single(Pooled::new(Single::punctuation(9, 3), Some(recycler.clone())));
        let copies = [msg.clone(), msg.clone()];
        let released: usize = copies
            .into_iter()
            .chain(std::iter::once(msg))
            .map(|m| usize::from(m.release()))
            .sum();
        assert_eq!(released, 1);
        assert_eq!(recycler.recycled(), 1);
    }
}
