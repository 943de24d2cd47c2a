//! Input watermark tracking.
//!
//! A replica with several upstream channels may only advance to the
//! smallest watermark among them (min semantics at fan-in). Channels that
//! delivered end of stream no longer hold the watermark back.

use smallvec::SmallVec;

/// Marker for a channel that delivered end of stream.
const CHANNEL_CLOSED: u64 = u64::MAX;

/// Per-channel watermarks of one replica.
#[derive(Debug, Clone)]
pub struct InputWatermarks {
    channels: SmallVec<[u64; 8]>,
    closed: usize,
    current: u64,
}

impl InputWatermarks {
    /// Tracks `channels` input channels, all starting at zero.
    #[must_use]
    pub fn new(channels: usize) -> Self {
        Self {
            channels: SmallVec::from_elem(0, channels.max(1)),
            closed: 0,
            current: 0,
        }
    }

    /// Records a watermark seen on `channel` and returns the replica watermark.
    ///
    /// Older watermarks on a channel are ignored.
    pub fn update(&mut self, channel: usize, watermark: u64) -> u64 {
        if let Some(slot) = self.channels.get_mut(channel) {
            if *slot != CHANNEL_CLOSED && watermark > *slot {
                *slot = watermark;
                self.recompute();
            }
        }
        self.current
    }

    /// Marks `channel` as finished; returns true once every channel is.
    pub fn close(&mut self, channel: usize) -> bool {
        if let Some(slot) = self.channels.get_mut(channel) {
            if *slot != CHANNEL_CLOSED {
                *slot = CHANNEL_CLOSED;
                self.closed += 1;
                self.recompute();
            }
        }
        self.all_closed()
    }

    /// Replica watermark: the minimum over open channels, never decreasing.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Number of tracked channels.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Returns true once every channel delivered end of stream.
    #[must_use]
    pub fn all_closed(&self) -> bool {
        self.closed == self.channels.len()
    }

    fn recompute(&mut self) {
        let min = self
            .channels
            .iter()
            .copied()
            .filter(|&wm| wm != CHANNEL_CLOSED)
            .min();
        if let Some(min) = min {
            self.current = self.current.max(min);
        }
    }
}

impl Default for InputWatermarks {
    fn default() -> Self {
        Self::new(1)
    }
}
