//! Window index arithmetic for one replica.
//!
//! A replica sees windows through its own geometry: local window `m` starts
//! at `offset + m * slide` and spans `length` positions. For the keyed role
//! the geometry is the operator's own (`offset = 0`). For the round-robin
//! role replica `i` of `P` uses `offset = i * slide` and a slide of
//! `slide * P`, so its local window `m` is global window `i + m * P`.
//!
//! Positions are per-key tuple ordinals for count-based windows and
//! timestamps for time-based windows.
//!
//! ```rust
//! use windlane_core::window::{WindowGeometry, WindowRole, WindowSpec};
//!
//! // Length 3, slide 1, replica 1 of 2 in the round-robin role
//! let geometry = WindowGeometry::new(&WindowSpec::count_based(3, 1), WindowRole::RoundRobin, 2, 1);
//!
//! // Position 3 falls in local windows 0 ([1, 4)) and 1 ([3, 6))
//! assert_eq!(geometry.windows_of(3), Some((0, 1)));
//! assert_eq!(geometry.global_index(1), 3);
//! ```

use super::{WindowRole, WindowSpec};

/// Replica-local view of a window sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    offset: u64,
    slide: u64,
    length: u64,
    /// Global index of local window 0
    phase: u64,
    /// Global indices between consecutive local windows
    stride: u64,
}

impl WindowGeometry {
    /// Geometry of replica `replica_index` of `parallelism`.
    ///
    /// # Panics
    ///
    /// Panics if the slide is zero; builders reject such specs beforehand.
    #[must_use]
    pub fn new(
        spec: &WindowSpec,
        role: WindowRole,
        parallelism: usize,
        replica_index: usize,
    ) -> Self {
        assert!(spec.slide > 0, "window slide must be positive");
        match role {
            WindowRole::RoundRobin if parallelism > 1 => {
                let p = parallelism as u64;
                let i = replica_index as u64;
                Self {
                    offset: i * spec.slide,
                    slide: spec.slide * p,
                    length: spec.length,
                    phase: i,
                    stride: p,
                }
            }
            _ => Self {
                offset: 0,
                slide: spec.slide,
                length: spec.length,
                phase: 0,
                stride: 1,
            },
        }
    }

    /// Range `(first, last)` of local windows containing `position`, if any.
    #[must_use]
    pub fn windows_of(&self, position: u64) -> Option<(u64, u64)> {
        let relative = position.checked_sub(self.offset)?;
        let last = relative / self.slide;
        let first = if relative >= self.length {
            (relative - self.length + 1).div_ceil(self.slide)
        } else {
            0
        };
        (first <= last).then_some((first, last))
    }

    /// First position of local window `m`.
    #[inline]
    #[must_use]
    pub fn start(&self, m: u64) -> u64 {
        self.offset.saturating_add(m.saturating_mul(self.slide))
    }

    /// One past the last position of local window `m`.
    #[inline]
    #[must_use]
    pub fn end(&self, m: u64) -> u64 {
        self.start(m).saturating_add(self.length)
    }

    /// First local window whose end lies beyond `position`.
    #[must_use]
    pub fn first_ending_after(&self, position: u64) -> u64 {
        match position.checked_sub(self.offset.saturating_add(self.length)) {
            Some(excess) => excess / self.slide + 1,
            None => 0,
        }
    }

    /// Operator-wide index of local window `m`.
    #[inline]
    #[must_use]
    pub fn global_index(&self, m: u64) -> u64 {
        self.phase + m * self.stride
    }

    /// Effective slide of this replica.
    #[must_use]
    pub fn slide(&self) -> u64 {
        self.slide
    }

    /// Position of local window 0.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
