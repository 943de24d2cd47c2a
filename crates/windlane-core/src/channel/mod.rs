//! # Channels
//!
//! Bounded SPSC lanes between replicas.
//!
//! Replicas never share mutable state; every message crosses a lane. A
//! full lane blocks its producer (backpressure) and an empty inlet blocks
//! its consumer, both according to the configured [`WaitStrategy`].

mod config;
mod lane;
mod spsc;

pub use config::{
    Backoff, ChannelConfig, ChannelConfigBuilder, WaitStrategy, DEFAULT_LANE_CAPACITY,
    MAX_LANE_CAPACITY, MIN_LANE_CAPACITY,
};
pub use lane::{mesh, Inlet, Outlet};
pub use spsc::{CachePadded, SpscQueue};
