//! # Stateless Operators
//!
//! Operators whose replicas keep no per-key state and push results through a
//! [`Shipper`](crate::shipper::Shipper).

pub mod flat_map;

pub use flat_map::{FlatMapFunction, FlatMapReplica};
