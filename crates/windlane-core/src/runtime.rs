//! # Replica Runtime
//!
//! One OS thread per replica. Each thread runs a pull-process-push loop:
//! it polls its [`Inlet`] round-robin over the upstream lanes, hands every
//! message to the replica, and lets the replica's emitter push results into
//! its outlet. The thread waits only when every inbound lane is empty or an
//! outbound lane is full, following the lanes' [`WaitStrategy`](crate::channel::WaitStrategy).
//!
//! A replica thread stops once its logic reports termination (end of stream
//! received on every channel) or when [`ReplicaHandle::shutdown`] is called.
//! Joining the handle returns the replica so its final state can be
//! inspected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::channel::{Backoff, Inlet};
use crate::message::Message;
use crate::operator::FlatMapReplica;
use crate::window::{RuntimeContext, WindowKey, WindowReplica};
use crate::Tuple;

/// Errors from replica threads.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The OS refused to start the thread
    #[error("Failed to spawn replica thread {name}: {message}")]
    SpawnFailed {
        /// Thread name
        name: String,
        /// OS error message
        message: String,
    },

    /// The replica panicked
    #[error("Replica thread {name} panicked")]
    Panicked {
        /// Thread name
        name: String,
    },
}

/// Logic a replica thread drives.
pub trait ReplicaLogic: Send + 'static {
    /// Tuple type received from upstream.
    type Input: Tuple;

    /// Handles one message received on `channel`.
    fn on_message(&mut self, channel: usize, message: Message<Self::Input>);

    /// Returns true once the replica has nothing left to do.
    fn is_terminated(&self) -> bool;

    /// Announces the number of upstream channels before the first message.
    fn bind_inputs(&mut self, channels: usize);

    /// Operator name.
    fn name(&self) -> &str;

    /// Replica identity.
    fn context(&self) -> &RuntimeContext;
}

impl<T: Tuple, K: WindowKey, R: Tuple> ReplicaLogic for WindowReplica<T, K, R> {
    type Input = T;

    fn on_message(&mut self, channel: usize, message: Message<T>) {
        self.process(channel, message);
    }

    fn is_terminated(&self) -> bool {
        WindowReplica::is_terminated(self)
    }

    fn bind_inputs(&mut self, channels: usize) {
        self.set_input_channels(channels);
    }

    fn name(&self) -> &str {
        WindowReplica::name(self)
    }

    fn context(&self) -> &RuntimeContext {
        WindowReplica::context(self)
    }
}

impl<T: Tuple, U: Tuple> ReplicaLogic for FlatMapReplica<T, U> {
    type Input = T;

    fn on_message(&mut self, channel: usize, message: Message<T>) {
        self.process(channel, message);
    }

    fn is_terminated(&self) -> bool {
        FlatMapReplica::is_terminated(self)
    }

    fn bind_inputs(&mut self, channels: usize) {
        self.set_input_channels(channels);
    }

    fn name(&self) -> &str {
        FlatMapReplica::name(self)
    }

    fn context(&self) -> &RuntimeContext {
        FlatMapReplica::context(self)
    }
}

/// Handle to a running replica thread.
pub struct ReplicaHandle<L> {
    name: String,
    thread: Option<JoinHandle<L>>,
    is_running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl<L: ReplicaLogic> ReplicaHandle<L> {
    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the replica loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Messages processed so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Asks the replica loop to stop at the next message boundary.
    ///
    /// Messages still queued are left unprocessed.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Waits for the thread and returns the replica.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Panicked`] if the replica panicked.
    pub fn join(mut self) -> Result<L, RuntimeError> {
        let name = std::mem::take(&mut self.name);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RuntimeError::Panicked { name }),
            None => Err(RuntimeError::Panicked { name }),
        }
    }
}

impl<L> Drop for ReplicaHandle<L> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Dropped without join: stop the loop and detach
            self.shutdown.store(true, Ordering::Release);
        }
    }
}

impl<L> std::fmt::Debug for ReplicaHandle<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaHandle")
            .field("name", &self.name)
            .field("is_running", &self.is_running.load(Ordering::Acquire))
            .field("processed", &self.processed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Starts `logic` on its own thread, fed by `inlet`.
///
/// The thread is named `<operator>-<replica index>`.
///
/// # Errors
///
/// Returns [`RuntimeError::SpawnFailed`] if the thread cannot be started.
pub fn spawn_replica<L: ReplicaLogic>(
    mut logic: L,
    mut inlet: Inlet<L::Input>,
) -> Result<ReplicaHandle<L>, RuntimeError> {
    let name = format!("{}-{}", logic.name(), logic.context().replica_index());
    let is_running = Arc::new(AtomicBool::new(true));
    let processed = Arc::new(AtomicU64::new(0));
    let shutdown = Arc::new(AtomicBool::new(false));

    let thread_running = Arc::clone(&is_running);
    let thread_processed = Arc::clone(&processed);
    let thread_shutdown = Arc::clone(&shutdown);
    let thread_name = name.clone();

    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            logic.bind_inputs(inlet.num_channels());
            tracing::debug!(
                "Replica {thread_name} started with {} input channels",
                inlet.num_channels()
            );
            let mut backoff = Backoff::new(inlet.wait_strategy());
            while !logic.is_terminated() {
                if thread_shutdown.load(Ordering::Acquire) {
                    tracing::warn!("Replica {thread_name} shut down before end of stream");
                    break;
                }
                match inlet.try_recv() {
                    Some((channel, message)) => {
                        logic.on_message(channel, message);
                        thread_processed.fetch_add(1, Ordering::Relaxed);
                        backoff.reset();
                    }
                    None => backoff.wait(),
                }
            }
            thread_running.store(false, Ordering::Release);
            logic
        })
        .map_err(|e| RuntimeError::SpawnFailed {
            name: name.clone(),
            message: e.to_string(),
        })?;

    Ok(ReplicaHandle {
        name,
        thread: Some(thread),
        is_running,
        processed,
        shutdown,
    })
}

/// Starts one thread per replica, replica `i` fed by `inlets[i]`.
///
/// # Errors
///
/// Returns the first spawn failure; replicas already started are shut down.
///
/// # Panics
///
/// Panics if the number of inlets differs from the number of replicas.
pub fn spawn_operator<L: ReplicaLogic>(
    replicas: Vec<L>,
    inlets: Vec<Inlet<L::Input>>,
) -> Result<Vec<ReplicaHandle<L>>, RuntimeError> {
    assert_eq!(replicas.len(), inlets.len(), "one inlet per replica required");
    let mut handles = Vec::with_capacity(replicas.len());
    for (logic, inlet) in replicas.into_iter().zip(inlets) {
        match spawn_replica(logic, inlet) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                for handle in &handles {
                    handle.shutdown();
                }
                return Err(e);
            }
        }
    }
    Ok(handles)
}

/// Joins every handle, returning the replicas in order.
///
/// # Errors
///
/// Returns the first join failure.
pub fn join_all<L: ReplicaLogic>(handles: Vec<ReplicaHandle<L>>) -> Result<Vec<L>, RuntimeError> {
    handles.into_iter().map(ReplicaHandle::join).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Pooled;
    use crate::channel::{mesh, ChannelConfig};
    use crate::emitter::Emitter;
    use crate::message::Single;
    use crate::shipper::Shipper;

    fn doubler() -> FlatMapReplica<u64, u64> {
        FlatMapReplica::new(
            "double",
            RuntimeContext::new(1, 0),
            |value: &u64, shipper: &mut Shipper<u64>| shipper.push(value * 2),
            Emitter::forward(0),
        )
    }

    #[test]
    fn test_replica_runs_until_end_of_stream() {
        let (mut outlets, inlets) = mesh::<u64>(2, 1, &ChannelConfig::default());
        let handle = spawn_replica(doubler(), inlets.into_iter().next().unwrap()).unwrap();
        assert_eq!(handle.name(), "double-0");

        for (producer, outlet) in outlets.iter_mut().enumerate() {
            let value = producer as u64 + 1;
            outlet.send(0, Message::Single(Pooled::detached(Single::new(value, 0, 0, 0))));
            outlet.send(0, Message::EndOfStream);
        }

        let mut replica = handle.join().unwrap();
        assert!(replica.is_terminated());
        assert_eq!(replica.stats().inputs(), 2);
        let mut doubled: Vec<u64> = replica
            .shipper_mut()
            .emitter_mut()
            .take_output_queue()
            .into_iter()
            .filter_map(|(message, _)| match message {
                Message::Single(single) => Some(*single.tuple()),
                _ => None,
            })
            .collect();
        doubled.sort_unstable();
        assert_eq!(doubled, vec![2, 4]);
    }

    #[test]
    fn test_shutdown_stops_idle_replica() {
        let (_outlets, inlets) = mesh::<u64>(1, 1, &ChannelConfig::default());
        let handle = spawn_replica(doubler(), inlets.into_iter().next().unwrap()).unwrap();
        handle.shutdown();
        let replica = handle.join().unwrap();
        assert!(!replica.is_terminated());
    }

    #[test]
    fn test_spawn_operator_and_join_all() {
        let replicas: Vec<_> = (0..3)
            .map(|i| {
                FlatMapReplica::new(
                    "noop",
                    RuntimeContext::new(3, i),
                    |_: &u64, _: &mut Shipper<u64>| {},
                    Emitter::forward(0),
                )
            })
            .collect();
        let (mut outlets, inlets) = mesh::<u64>(1, 3, &ChannelConfig::default());
        let handles = spawn_operator(replicas, inlets).unwrap();
        for dest in 0..3 {
            outlets[0].send(dest, Message::EndOfStream);
        }
        let replicas = join_all(handles).unwrap();
        assert!(replicas.iter().all(FlatMapReplica::is_terminated));
        assert_eq!(replicas[2].context().replica_index(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::Panicked {
            name: "sum-1".into(),
        };
        assert_eq!(err.to_string(), "Replica thread sum-1 panicked");
    }
}
