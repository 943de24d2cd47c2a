//! Operator configuration.
//!
//! [`WindowConfig`] is the file-loadable description of a windowed
//! aggregation; it deserializes with `serde` and is turned into an operator
//! by [`ParallelWindows::from_config`](crate::window::ParallelWindows::from_config).
//! All window parameters are validated before any replica exists.
//!
//! ```rust
//! use windlane_core::config::{WindowConfig, WindowKind};
//!
//! let config = WindowConfig {
//!     name: "clicks_per_minute".into(),
//!     parallelism: 2,
//!     output_batch_size: 0,
//!     window: WindowKind::TimeBased { length: 60_000, slide: 10_000, quantum: 1_000, lateness: 500 },
//!     role: Default::default(),
//!     execution_mode: Default::default(),
//! };
//! assert!(config.validate(true).is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::emitter::ExecutionMode;
use crate::window::{WindowRole, WindowSpec};

/// Configuration errors, reported when an operator is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The operator has no replicas.
    #[error("operator '{0}': parallelism must be greater than zero")]
    ZeroParallelism(String),

    /// Windows of length zero.
    #[error("window length must be greater than zero")]
    ZeroWindowLength,

    /// Windows that never advance.
    #[error("window slide must be greater than zero")]
    ZeroSlide,

    /// Time-based windows with a zero time quantum.
    #[error("time quantum must be greater than zero")]
    ZeroQuantum,

    /// Time-based window boundaries not aligned to the quantum.
    #[error("window length {length} and slide {slide} must be multiples of the quantum {quantum}")]
    QuantumMisaligned {
        /// Window length
        length: u64,
        /// Window slide
        slide: u64,
        /// Time quantum
        quantum: u64,
    },

    /// Round-robin role over several replicas without a key extractor.
    #[error("operator '{0}': the round-robin role with parallelism > 1 requires a key extractor")]
    MissingKeyExtractor(String),

    /// No window was configured.
    #[error("operator '{0}': no window specification")]
    MissingWindow(String),
}

/// Window shape as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowKind {
    /// Windows delimited by per-key tuple counts.
    CountBased {
        /// Tuples per window
        length: u64,
        /// Tuples between window starts
        slide: u64,
    },
    /// Windows delimited by event time.
    TimeBased {
        /// Window span
        length: u64,
        /// Time between window starts
        slide: u64,
        /// Time granularity both `length` and `slide` are multiples of
        #[serde(default = "default_quantum")]
        quantum: u64,
        /// Grace period after a window's end
        #[serde(default)]
        lateness: u64,
    },
}

fn default_quantum() -> u64 {
    1
}

fn default_parallelism() -> usize {
    1
}

impl From<WindowKind> for WindowSpec {
    fn from(kind: WindowKind) -> Self {
        match kind {
            WindowKind::CountBased { length, slide } => WindowSpec::count_based(length, slide),
            WindowKind::TimeBased {
                length,
                slide,
                quantum,
                lateness,
            } => WindowSpec::time_based(length, slide)
                .with_quantum(quantum)
                .with_lateness(lateness),
        }
    }
}

/// Deserializable configuration of a parallel window operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Operator name, used in logs and errors.
    pub name: String,
    /// Number of replicas.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Batch size of the replicas' default emitters, 0 for per-tuple delivery.
    #[serde(default)]
    pub output_batch_size: usize,
    /// Window shape.
    pub window: WindowKind,
    /// How windows are divided between replicas.
    #[serde(default)]
    pub role: WindowRole,
    /// Progress semantics.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

impl WindowConfig {
    /// Checks the configuration.
    ///
    /// `has_key_extractor` tells whether the operator will be given a key
    /// extractor, which the round-robin role requires.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self, has_key_extractor: bool) -> Result<(), ConfigError> {
        validate(
            &self.name,
            self.parallelism,
            &self.window.into(),
            self.role,
            has_key_extractor,
        )
    }
}

/// Validates window operator parameters.
pub(crate) fn validate(
    name: &str,
    parallelism: usize,
    spec: &WindowSpec,
    role: WindowRole,
    has_key_extractor: bool,
) -> Result<(), ConfigError> {
    if parallelism == 0 {
        return Err(ConfigError::ZeroParallelism(name.to_string()));
    }
    if spec.length == 0 {
        return Err(ConfigError::ZeroWindowLength);
    }
    if spec.slide == 0 {
        return Err(ConfigError::ZeroSlide);
    }
    if spec.is_time_based() {
        if spec.quantum == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if spec.length % spec.quantum != 0 || spec.slide % spec.quantum != 0 {
            return Err(ConfigError::QuantumMisaligned {
                length: spec.length,
                slide: spec.slide,
                quantum: spec.quantum,
            });
        }
    }
    if role == WindowRole::RoundRobin && parallelism > 1 && !has_key_extractor {
        return Err(ConfigError::MissingKeyExtractor(name.to_string()));
    }
    Ok(())
}
