//! Parallel window operator and its builder.

use std::sync::Arc;

use super::{
    ClosingHook, RuntimeContext, WindowFunction, WindowKey, WindowReplica, WindowResult,
    WindowRole, WindowSpec, WindowType,
};
use crate::channel::Outlet;
use crate::config::{self, ConfigError, WindowConfig};
use crate::emitter::{Emitter, ExecutionMode, KeyExtractor, RoutingMode};
use crate::Tuple;

/// A windowed aggregation computed by `parallelism` replicas.
///
/// Upstream operators must deliver the whole stream to every replica
/// (see [`input_routing`](Self::input_routing)); each replica decides on
/// its own which keys or which window indices it computes.
pub struct ParallelWindows<T, K, R> {
    name: String,
    parallelism: usize,
    output_batch_size: usize,
    spec: WindowSpec,
    role: WindowRole,
    replicas: Vec<WindowReplica<T, K, R>>,
}

impl<T: Tuple, K: WindowKey, R: Tuple> ParallelWindows<T, K, R> {
    /// Starts building an operator around `function`.
    #[must_use]
    pub fn builder(function: WindowFunction<T, K, R>) -> ParallelWindowsBuilder<T, K, R> {
        ParallelWindowsBuilder::new(function)
    }

    /// Builds an operator from a deserialized configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn from_config(
        config: &WindowConfig,
        function: WindowFunction<T, K, R>,
        key_extractor: Option<KeyExtractor<T, K>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Self::builder(function)
            .name(config.name.clone())
            .parallelism(config.parallelism)
            .output_batch_size(config.output_batch_size)
            .role(config.role)
            .execution_mode(config.execution_mode)
            .window(config.window.into());
        if let Some(extractor) = key_extractor {
            builder = builder.with_key_extractor(extractor);
        }
        builder.build()
    }

    /// Operator name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of replicas.
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Batch size of the replicas' default emitters.
    #[must_use]
    pub fn output_batch_size(&self) -> usize {
        self.output_batch_size
    }

    /// Count-based or time-based.
    #[must_use]
    pub fn window_type(&self) -> WindowType {
        self.spec.window_type
    }

    /// Window shape.
    #[must_use]
    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    /// How windows are divided between replicas.
    #[must_use]
    pub fn role(&self) -> WindowRole {
        self.role
    }

    /// Routing upstream emitters must use toward this operator.
    #[must_use]
    pub fn input_routing(&self) -> RoutingMode {
        RoutingMode::Broadcast
    }

    /// Installs the output emitter: replica 0 gets `emitter`, the others clones.
    pub fn set_emitter(&mut self, emitter: Emitter<WindowResult<K, R>>) {
        let mut emitter = Some(emitter);
        for replica in self.replicas.iter_mut().rev() {
            let next = if replica.context().replica_index() == 0 {
                emitter.take()
            } else {
                emitter.as_ref().cloned()
            };
            if let Some(next) = next {
                replica.set_emitter(next);
            }
        }
    }

    /// Connects replica `i` to `outlets[i]`.
    ///
    /// # Panics
    ///
    /// Panics if the number of outlets differs from the parallelism.
    pub fn connect(&mut self, outlets: Vec<Outlet<WindowResult<K, R>>>) {
        assert_eq!(
            outlets.len(),
            self.replicas.len(),
            "one outlet per replica required"
        );
        for (replica, outlet) in self.replicas.iter_mut().zip(outlets) {
            replica.emitter_mut().connect(outlet);
        }
    }

    /// Sets the execution mode of every replica.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        for replica in &mut self.replicas {
            replica.set_execution_mode(mode);
        }
    }

    /// Returns true once every replica terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.replicas.iter().all(WindowReplica::is_terminated)
    }

    /// Late tuples dropped, summed over replicas.
    ///
    /// With the round-robin role every replica sees every tuple, so a tuple
    /// late for all of them is counted once per replica.
    #[must_use]
    pub fn num_ignored_tuples(&self) -> u64 {
        self.replicas
            .iter()
            .map(WindowReplica::num_ignored_tuples)
            .sum()
    }

    /// The replicas.
    #[must_use]
    pub fn replicas(&self) -> &[WindowReplica<T, K, R>] {
        &self.replicas
    }

    /// Mutable access to the replicas.
    pub fn replicas_mut(&mut self) -> &mut [WindowReplica<T, K, R>] {
        &mut self.replicas
    }

    /// Hands the replicas over, typically to one thread each.
    #[must_use]
    pub fn into_replicas(self) -> Vec<WindowReplica<T, K, R>> {
        self.replicas
    }
}

impl<T, K, R> std::fmt::Debug for ParallelWindows<T, K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelWindows")
            .field("name", &self.name)
            .field("parallelism", &self.parallelism)
            .field("spec", &self.spec)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ParallelWindows`].
pub struct ParallelWindowsBuilder<T, K, R> {
    function: WindowFunction<T, K, R>,
    name: Option<String>,
    parallelism: Option<usize>,
    output_batch_size: Option<usize>,
    key_extractor: Option<KeyExtractor<T, K>>,
    window: Option<WindowSpec>,
    quantum: Option<u64>,
    lateness: Option<u64>,
    role: Option<WindowRole>,
    execution_mode: Option<ExecutionMode>,
    closing: Option<ClosingHook>,
}

impl<T: Tuple, K: WindowKey, R: Tuple> ParallelWindowsBuilder<T, K, R> {
    fn new(function: WindowFunction<T, K, R>) -> Self {
        Self {
            function,
            name: None,
            parallelism: None,
            output_batch_size: None,
            key_extractor: None,
            window: None,
            quantum: None,
            lateness: None,
            role: None,
            execution_mode: None,
            closing: None,
        }
    }

    /// Sets the operator name (default `"windows"`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the number of replicas (default 1).
    #[must_use]
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Sets the batch size of the replicas' default emitters (default 0).
    #[must_use]
    pub fn output_batch_size(mut self, batch_size: usize) -> Self {
        self.output_batch_size = Some(batch_size);
        self
    }

    /// Partitions tuples by the key `extract` returns.
    #[must_use]
    pub fn key_extractor<F>(self, extract: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        self.with_key_extractor(KeyExtractor::new(extract))
    }

    /// Partitions tuples with an existing extractor.
    #[must_use]
    pub fn with_key_extractor(mut self, extractor: KeyExtractor<T, K>) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    /// Count-based windows of `length` tuples every `slide` tuples.
    #[must_use]
    pub fn count_based(self, length: u64, slide: u64) -> Self {
        self.window(WindowSpec::count_based(length, slide))
    }

    /// Time-based windows of `length` time units every `slide`.
    #[must_use]
    pub fn time_based(self, length: u64, slide: u64) -> Self {
        self.window(WindowSpec::time_based(length, slide))
    }

    /// Sets the whole window shape.
    #[must_use]
    pub fn window(mut self, spec: WindowSpec) -> Self {
        self.window = Some(spec);
        self
    }

    /// Time granularity of time-based windows (default 1).
    #[must_use]
    pub fn quantum(mut self, quantum: u64) -> Self {
        self.quantum = Some(quantum);
        self
    }

    /// Grace period of time-based windows (default 0).
    #[must_use]
    pub fn lateness(mut self, lateness: u64) -> Self {
        self.lateness = Some(lateness);
        self
    }

    /// Sets the replica role (default keyed).
    #[must_use]
    pub fn role(mut self, role: WindowRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Sets the execution mode (default [`ExecutionMode::Default`]).
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Runs `hook` once per replica when it terminates.
    #[must_use]
    pub fn closing<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RuntimeContext) + Send + Sync + 'static,
    {
        self.closing = Some(Arc::new(hook));
        self
    }

    /// Validates the parameters and creates the replicas.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a missing window, zero parallelism, zero
    /// length or slide, a misaligned quantum, or the round-robin role over
    /// several replicas without a key extractor.
    pub fn build(self) -> Result<ParallelWindows<T, K, R>, ConfigError> {
        let name = self.name.unwrap_or_else(|| "windows".to_string());
        let mut spec = self
            .window
            .ok_or_else(|| ConfigError::MissingWindow(name.clone()))?;
        if let Some(quantum) = self.quantum {
            spec.quantum = quantum;
        }
        if let Some(lateness) = self.lateness {
            spec.lateness = lateness;
        }
        let parallelism = self.parallelism.unwrap_or(1);
        let output_batch_size = self.output_batch_size.unwrap_or(0);
        let role = self.role.unwrap_or_default();
        let mode = self.execution_mode.unwrap_or_default();

        config::validate(
            &name,
            parallelism,
            &spec,
            role,
            self.key_extractor.is_some(),
        )?;

        let replicas = (0..parallelism)
            .map(|index| {
                let mut replica = WindowReplica::new(
                    name.clone(),
                    RuntimeContext::new(parallelism, index),
                    spec,
                    role,
                    self.function.clone(),
                    self.key_extractor.clone(),
                    Emitter::forward(output_batch_size),
                    self.closing.clone(),
                );
                replica.set_execution_mode(mode);
                replica
            })
            .collect();

        tracing::info!(
            "Built window operator '{}': {:?} length {} slide {}, {:?} role, parallelism {}",
            name,
            spec.window_type,
            spec.length,
            spec.slide,
            role,
            parallelism
        );

        Ok(ParallelWindows {
            name,
            parallelism,
            output_batch_size,
            spec,
            role,
            replicas,
        })
    }
}

impl<T, K, R> std::fmt::Debug for ParallelWindowsBuilder<T, K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelWindowsBuilder")
            .field("name", &self.name)
            .field("parallelism", &self.parallelism)
            .field("window", &self.window)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}
