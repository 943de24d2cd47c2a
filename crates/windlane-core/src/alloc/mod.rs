//! # Envelope Recycling
//!
//! Allocation avoidance for the message path.
//!
//! - [`ObjectPool`]: bounded free list owned by a single thread
//! - [`Recycler`]: thread-shareable handle to a pool, used by consumers to
//!   return envelopes to the emitter that produced them
//! - [`Pooled`]: reference-counted envelope handle; the holder that releases
//!   the last reference returns the object to its pool exactly once

mod object_pool;
mod recycler;
mod shared;

pub use object_pool::ObjectPool;
pub use recycler::{Recyclable, Recycler, DEFAULT_POOL_CAPACITY};
pub use shared::Pooled;
