//! Outlets and inlets.
//!
//! A replica producing to `D` destinations owns an [`Outlet`] with one lane
//! per destination. A replica consuming from `P` producers owns an [`Inlet`]
//! with one lane per producer. Each lane is an [`SpscQueue`], so per-lane
//! FIFO order is preserved and no lane is ever shared by two writers.

use std::sync::Arc;

use super::{Backoff, ChannelConfig, SpscQueue, WaitStrategy};
use crate::message::Message;

type Lane<T> = Arc<SpscQueue<Message<T>>>;

/// Producer side: one lane per destination.
#[derive(Debug)]
pub struct Outlet<T> {
    lanes: Vec<Lane<T>>,
    wait: WaitStrategy,
    blocked_sends: u64,
}

impl<T> Outlet<T> {
    /// Number of destinations reachable through this outlet.
    #[must_use]
    pub fn num_destinations(&self) -> usize {
        self.lanes.len()
    }

    /// Sends `message` to `dest`, waiting while its lane is full.
    ///
    /// # Panics
    ///
    /// Panics if `dest` is out of range.
    pub fn send(&mut self, dest: usize, message: Message<T>) {
        let lane = &self.lanes[dest];
        let mut pending = message;
        let mut backoff = Backoff::new(self.wait);
        let mut blocked = false;
        while let Err(back) = lane.push(pending) {
            pending = back;
            blocked = true;
            backoff.wait();
        }
        if blocked {
            self.blocked_sends += 1;
        }
    }

    /// Sends without waiting.
    ///
    /// # Errors
    ///
    /// Returns the message back when the lane is full.
    pub fn try_send(&mut self, dest: usize, message: Message<T>) -> Result<(), Message<T>> {
        self.lanes[dest].push(message)
    }

    /// Number of sends that found their lane full and had to wait.
    #[must_use]
    pub fn blocked_sends(&self) -> u64 {
        self.blocked_sends
    }
}

/// Consumer side: one lane per upstream producer.
#[derive(Debug)]
pub struct Inlet<T> {
    lanes: Vec<Lane<T>>,
    wait: WaitStrategy,
    /// Lane to poll first on the next receive
    cursor: usize,
}

impl<T> Inlet<T> {
    /// Number of upstream producers.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.lanes.len()
    }

    /// Wait strategy configured for this inlet.
    #[must_use]
    pub fn wait_strategy(&self) -> WaitStrategy {
        self.wait
    }

    /// Polls every lane once, starting after the last lane served.
    ///
    /// Returns the channel index together with the message.
    pub fn try_recv(&mut self) -> Option<(usize, Message<T>)> {
        let n = self.lanes.len();
        for offset in 0..n {
            let channel = (self.cursor + offset) % n;
            if let Some(message) = self.lanes[channel].pop() {
                self.cursor = (channel + 1) % n;
                return Some((channel, message));
            }
        }
        None
    }

    /// Receives the next message, waiting while every lane is empty.
    pub fn recv(&mut self) -> (usize, Message<T>) {
        let mut backoff = Backoff::new(self.wait);
        loop {
            if let Some(received) = self.try_recv() {
                return received;
            }
            backoff.wait();
        }
    }

    /// Returns true if every lane is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(|lane| lane.is_empty())
    }
}

/// Builds the lane matrix between `producers` and `consumers` replicas.
///
/// Outlet `p` reaches every consumer; inlet `c` hears from every producer,
/// with channel index `p` for producer `p`.
#[must_use]
pub fn mesh<T>(
    producers: usize,
    consumers: usize,
    config: &ChannelConfig,
) -> (Vec<Outlet<T>>, Vec<Inlet<T>>) {
    let capacity = config.effective_capacity();
    let lanes: Vec<Vec<Lane<T>>> = (0..producers)
        .map(|_| {
            (0..consumers)
                .map(|_| Arc::new(SpscQueue::new(capacity)))
                .collect()
        })
        .collect();

    let inlets = (0..consumers)
        .map(|c| Inlet {
            lanes: lanes.iter().map(|row| Arc::clone(&row[c])).collect(),
            wait: config.wait_strategy,
            cursor: 0,
        })
        .collect();
    let outlets = lanes
        .into_iter()
        .map(|row| Outlet {
            lanes: row,
            wait: config.wait_strategy,
            blocked_sends: 0,
        })
        .collect();
    (outlets, inlets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Pooled;
    use crate::message::Single;

    fn data(value: u32) -> Message<u32> {
        Message::Single(Pooled::detached(Single::new(value, 0, u64::from(value), 0)))
    }

    fn value_of(message: &Message<u32>) -> u32 {
        match message {
            Message::Single(s) => *s.tuple(),
            _ => panic!("expected single"),
        }
    }

    #[test]
    fn test_mesh_shape() {
        let (outlets, inlets) = mesh::<u32>(3, 2, &ChannelConfig::default());
        assert_eq!(outlets.len(), 3);
        assert_eq!(inlets.len(), 2);
        assert!(outlets.iter().all(|o| o.num_destinations() == 2));
        assert!(inlets.iter().all(|i| i.num_channels() == 3));
    }

    #[test]
    fn test_channel_index_identifies_producer() {
        let (mut outlets, mut inlets) = mesh::<u32>(2, 1, &ChannelConfig::default());
        outlets[1].send(0, data(11));
        let (channel, message) = inlets[0].recv();
        assert_eq!(channel, 1);
        assert_eq!(value_of(&message), 11);
        assert!(inlets[0].try_recv().is_none());
    }

    #[test]
    fn test_recv_rotates_between_lanes() {
        let (mut outlets, mut inlets) = mesh::<u32>(2, 1, &ChannelConfig::default());
        for v in 0..3 {
            outlets[0].send(0, data(v));
            outlets[1].send(0, data(100 + v));
        }
        let channels: Vec<usize> = (0..6).map(|_| inlets[0].recv().0).collect();
        assert_eq!(channels, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_try_send_reports_full_lane() {
        let config = ChannelConfig::builder().capacity(4).build();
        let (mut outlets, _inlets) = mesh::<u32>(1, 1, &config);
        for v in 0..3 {
            assert!(outlets[0].try_send(0, data(v)).is_ok());
        }
        assert!(outlets[0].try_send(0, data(3)).is_err());
    }

    #[test]
    fn test_blocking_send_waits_for_consumer() {
        let config = ChannelConfig::builder().capacity(4).build();
        let (mut outlets, mut inlets) = mesh::<u32>(1, 1, &config);
        let mut outlet = outlets.pop().unwrap();
        let producer = std::thread::spawn(move || {
            for v in 0..100 {
                outlet.send(0, data(v));
            }
            outlet.send(0, Message::EndOfStream);
        });

        let mut seen = Vec::new();
        loop {
            let (_, message) = inlets[0].recv();
            if message.is_end_of_stream() {
                break;
            }
            seen.push(value_of(&message));
        }
        producer.join().unwrap();
        assert!(seen.into_iter().eq(0..100));
    }
}
