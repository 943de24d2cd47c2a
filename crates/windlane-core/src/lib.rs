//! # `Windlane` Core
//!
//! The execution core of `windlane`, a single-process, multi-core dataflow
//! engine for continuous stream processing.
//!
//! This crate provides:
//! - **Messages**: single and batch envelopes with per-destination watermarks
//! - **Recycling**: bounded object pools and reference-counted shared envelopes
//! - **Emitters**: keyed, broadcast, round-robin and forward routing with
//!   batching and punctuation synthesis
//! - **Windows**: count-based and time-based windowed aggregation, parallel
//!   over keys or over window indices of a single key
//! - **Runtime**: one OS thread per replica, connected by SPSC lanes
//!
//! ## Design Principles
//!
//! 1. **Thread-private hot path** - emitter and window state are owned by one replica
//! 2. **No locks between replicas** - bounded SPSC lanes carry every message
//! 3. **Explicit progress** - watermarks travel with data and as punctuations
//! 4. **Fail fast on configuration** - builders validate before any thread starts
//!
//! ## Example
//!
//! ```rust,ignore
//! use windlane_core::window::{ParallelWindows, WindowFunction};
//!
//! let windows = ParallelWindows::<u64, u64, u64>::builder(WindowFunction::incremental(
//!     |value: &u64, sum: &mut u64| *sum += *value,
//! ))
//! .name("sum")
//! .parallelism(4)
//! .key_extractor(|value: &u64| *value % 16)
//! .count_based(100, 10)
//! .build()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // The lane queue opts in locally
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
pub mod channel;
pub mod config;
pub mod emitter;
pub mod message;
pub mod operator;
pub mod runtime;
pub mod shipper;
pub mod window;

// Re-export key types
pub use config::{ConfigError, WindowConfig};
pub use emitter::{Emitter, ExecutionMode, KeyExtractor, PunctuationPolicy};
pub use message::{Batch, Message, Single};
pub use operator::FlatMapReplica;
pub use runtime::{spawn_operator, spawn_replica, ReplicaHandle, ReplicaLogic};
pub use shipper::Shipper;
pub use window::{ParallelWindows, WindowFunction, WindowResult};

/// Payload carried through the engine.
///
/// Punctuations carry a default-constructed payload, so every tuple type must
/// be `Default`. Tuples cross replica threads inside shared envelopes, hence
/// `Send + Sync`.
pub trait Tuple: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Tuple for T {}

/// Result type for windlane-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for windlane-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operator configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Replica threads could not be started or joined
    #[error("Runtime error: {0}")]
    Runtime(#[from] runtime::RuntimeError),
}
