//! Lane configuration and waiting policy.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lane capacity, in messages.
pub const DEFAULT_LANE_CAPACITY: usize = 2048;

/// Minimum lane capacity.
pub const MIN_LANE_CAPACITY: usize = 4;

/// Maximum lane capacity.
pub const MAX_LANE_CAPACITY: usize = 1 << 20;

/// How a blocked side waits for its lane.
///
/// Applies both to a consumer whose inbound lanes are all empty and to a
/// producer whose outbound lane is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Busy-spin (lowest latency, one core burned per waiting replica).
    Spin,
    /// Spin for a while, then yield the thread.
    #[default]
    SpinYield,
    /// Sleep in short parks between attempts.
    Park,
}

/// Escalating waiter driven by a [`WaitStrategy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    strategy: WaitStrategy,
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 64;
    const PARK_TIMEOUT: Duration = Duration::from_micros(50);

    /// Creates a waiter at its first step.
    #[must_use]
    pub fn new(strategy: WaitStrategy) -> Self {
        Self { strategy, step: 0 }
    }

    /// Waits once; repeated calls escalate according to the strategy.
    pub fn wait(&mut self) {
        match self.strategy {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::SpinYield => {
                if self.step < Self::SPIN_LIMIT {
                    std::hint::spin_loop();
                } else {
                    thread::yield_now();
                }
            }
            WaitStrategy::Park => {
                if self.step < Self::SPIN_LIMIT {
                    thread::yield_now();
                } else {
                    thread::park_timeout(Self::PARK_TIMEOUT);
                }
            }
        }
        self.step = self.step.saturating_add(1);
    }

    /// Restarts escalation after progress was made.
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

/// Configuration of the lanes between two replica groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Slots per lane (rounded up to a power of two).
    pub capacity: usize,
    /// Waiting policy for both sides.
    pub wait_strategy: WaitStrategy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LANE_CAPACITY,
            wait_strategy: WaitStrategy::default(),
        }
    }
}

impl ChannelConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Lane capacity after clamping and power-of-two rounding.
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        self.capacity
            .clamp(MIN_LANE_CAPACITY, MAX_LANE_CAPACITY)
            .next_power_of_two()
    }
}

/// Builder for [`ChannelConfig`].
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    capacity: Option<usize>,
    wait_strategy: Option<WaitStrategy>,
}

impl ChannelConfigBuilder {
    /// Sets the lane capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the wait strategy.
    #[must_use]
    pub fn wait_strategy(mut self, strategy: WaitStrategy) -> Self {
        self.wait_strategy = Some(strategy);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChannelConfig {
        ChannelConfig {
            capacity: self.capacity.unwrap_or(DEFAULT_LANE_CAPACITY),
            wait_strategy: self.wait_strategy.unwrap_or_default(),
        }
    }
}
