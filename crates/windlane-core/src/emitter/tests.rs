use std::time::Duration;

use super::*;
use crate::channel::{mesh, ChannelConfig};

fn identity_keyed(num_dests: usize, batch_size: usize) -> Emitter<u64> {
    Emitter::keyed(KeyExtractor::new(|v: &u64| *v), num_dests, batch_size)
}

/// Punctuates on every input, with no interval.
fn eager() -> PunctuationPolicy {
    PunctuationPolicy::new(1, Duration::ZERO)
}

/// Never reaches a sampling point in these tests.
fn quiet() -> PunctuationPolicy {
    PunctuationPolicy::new(u64::MAX, Duration::from_secs(3600))
}

fn data_values(message: &Message<u64>) -> Vec<u64> {
    match message {
        Message::Single(s) if !s.is_punctuation() => vec![*s.tuple()],
        Message::Batch(b) if !b.is_punctuation() => b.tuples().to_vec(),
        _ => Vec::new(),
    }
}

#[test]
fn test_keyed_routing_is_deterministic() {
    let mut emitter = identity_keyed(4, 0).with_punctuation_policy(quiet());
    for round in 0..3u64 {
        for key in 0..20u64 {
            emitter.emit(key, 0, round * 100 + key, round);
        }
    }
    for (message, dest) in emitter.take_output_queue() {
        for value in data_values(&message) {
            assert_eq!(dest, partition_of(hash_key(&value), 4));
        }
        message.release();
    }
}

#[test]
fn test_per_tuple_mode_sends_one_envelope_per_tuple() {
    let mut emitter = identity_keyed(2, 0).with_punctuation_policy(quiet());
    for v in 0..10 {
        emitter.emit(v, v, v, 0);
    }
    let queue = emitter.output_queue();
    assert_eq!(queue.len(), 10);
    assert!(queue.iter().all(|(m, _)| matches!(m, Message::Single(_))));
    assert_eq!(emitter.stats().messages, 10);
}

#[test]
fn test_batches_never_exceed_target_size() {
    let mut emitter = identity_keyed(3, 4).with_punctuation_policy(quiet());
    for v in 0..50 {
        emitter.emit(v, 0, v, v);
    }
    let before_flush: usize = emitter
        .output_queue()
        .iter()
        .map(|(m, _)| m.num_tuples())
        .sum();
    assert_eq!(before_flush + emitter.pending_tuples(), 50);

    emitter.flush();
    assert_eq!(emitter.pending_tuples(), 0);

    let mut total = 0;
    for (message, _) in emitter.take_output_queue() {
        match &message {
            Message::Batch(b) => {
                assert!(b.len() <= 4);
                assert!(!b.is_empty());
                total += b.len();
            }
            other => panic!("unexpected message {other:?}"),
        }
        message.release();
    }
    assert_eq!(total, 50);
}

#[test]
fn test_full_batch_dispatched_immediately() {
    let mut emitter = Emitter::forward(3).with_punctuation_policy(quiet());
    emitter.emit(1u64, 0, 1, 1);
    emitter.emit(2u64, 0, 2, 2);
    assert!(emitter.output_queue().is_empty());
    emitter.emit(3u64, 0, 3, 3);
    assert_eq!(emitter.output_queue().len(), 1);
    assert_eq!(emitter.output_queue()[0].0.watermark(), Some(3));
}

#[test]
fn test_watermarks_non_decreasing_per_destination() {
    let mut emitter = identity_keyed(3, 2).with_punctuation_policy(eager());
    for v in 0..200u64 {
        // Skewed keys: destination traffic is uneven
        emitter.emit(v % 5, 0, v, v / 3);
    }
    emitter.propagate_punctuation(200);

    let mut last = [0u64; 3];
    for (message, dest) in emitter.take_output_queue() {
        let wm = match &message {
            Message::Single(s) => s.watermark_for(dest),
            Message::Batch(b) => b.watermark_for(dest),
            Message::EndOfStream => continue,
        };
        assert!(wm >= last[dest], "dest {dest}: {wm} < {}", last[dest]);
        last[dest] = wm;
        message.release();
    }
    assert_eq!(last, [200; 3]);
}

#[test]
fn test_idle_destination_receives_punctuation() {
    // Every tuple carries the same key, so one destination never sees data
    let mut emitter = Emitter::keyed(KeyExtractor::new(|_: &u64| 7u64), 2, 0)
        .with_punctuation_policy(eager());
    let busy = partition_of(hash_key(&7u64), 2);
    let idle = 1 - busy;

    for wm in 1..=5u64 {
        emitter.emit(wm, 0, wm, wm);
    }
    let to_idle: Vec<_> = emitter
        .output_queue()
        .iter()
        .filter(|(_, d)| *d == idle)
        .map(|(m, _)| m)
        .collect();
    assert_eq!(to_idle.len(), 5);
    assert!(to_idle.iter().all(|m| m.is_punctuation()));
    assert_eq!(to_idle.last().and_then(|m| m.watermark()), Some(5));
    assert_eq!(emitter.last_sent_watermark(idle), 5);

    // The busy destination is punctuated only on the first check, before
    // any data reached it
    let busy_puncts = emitter
        .output_queue()
        .iter()
        .filter(|(m, d)| *d == busy && m.is_punctuation())
        .count();
    assert_eq!(busy_puncts, 1);
}

#[test]
fn test_punctuation_respects_interval() {
    let policy = PunctuationPolicy::new(1, Duration::from_secs(3600));
    let mut emitter = identity_keyed(2, 0).with_punctuation_policy(policy);
    for v in 0..100 {
        emitter.emit(0, 0, v, v);
    }
    assert_eq!(emitter.stats().punctuations, 0);
}

#[test]
fn test_busy_round_does_not_restart_interval() {
    let interval = Duration::from_millis(200);
    let mut emitter =
        identity_keyed(2, 0).with_punctuation_policy(PunctuationPolicy::new(1, interval));
    let to_dest = |dest: usize| (0..).find(|v| partition_of(hash_key(v), 2) == dest).unwrap();
    let (a, b) = (to_dest(0), to_dest(1));

    // Both destinations busy within the first interval
    emitter.emit(a, 0, 1, 1);
    emitter.emit(b, 0, 2, 2);
    std::thread::sleep(interval + Duration::from_millis(50));

    // No destination is idle: nothing sent, and the next sample checks again
    emitter.emit(a, 0, 3, 3);
    assert_eq!(emitter.stats().punctuations, 0);
    emitter.emit(a, 0, 4, 4);
    assert_eq!(emitter.stats().punctuations, 1);
    for (message, _) in emitter.take_output_queue() {
        message.release();
    }
}

#[test]
fn test_deterministic_mode_has_no_punctuations() {
    let mut emitter = identity_keyed(2, 0).with_punctuation_policy(eager());
    emitter.set_execution_mode(ExecutionMode::Deterministic);
    for v in 0..100 {
        emitter.emit(0, 0, v, v);
    }
    assert_eq!(emitter.stats().punctuations, 0);
    assert!(emitter.output_queue().iter().all(|(m, _)| !m.is_punctuation()));
}

#[test]
fn test_partial_batch_flushed_before_punctuation() {
    let mut emitter = identity_keyed(2, 8).with_punctuation_policy(quiet());
    emitter.emit(0, 0, 1, 1);
    emitter.emit(1, 0, 2, 2);
    emitter.propagate_punctuation(10);

    let queue = emitter.take_output_queue();
    let data: Vec<_> = queue.iter().take_while(|(m, _)| !m.is_punctuation()).collect();
    let puncts: Vec<_> = queue.iter().skip(data.len()).collect();
    assert_eq!(data.iter().map(|(m, _)| m.num_tuples()).sum::<usize>(), 2);
    assert_eq!(puncts.len(), 2);
    for (m, _) in &puncts {
        assert_eq!(m.watermark(), Some(10));
    }
    for (m, _) in queue {
        m.release();
    }
}

#[test]
fn test_shared_punctuation_recycled_once() {
    let mut emitter = identity_keyed(3, 0).with_punctuation_policy(quiet());
    emitter.propagate_punctuation(42);
    let mut queue = emitter.take_output_queue();
    assert_eq!(queue.len(), 3);
    match &queue[0].0 {
        Message::Single(s) => assert_eq!(s.holders(), 3),
        other => panic!("unexpected message {other:?}"),
    }

    // Consume out of order
    queue.swap(0, 2);
    let last_flags: Vec<bool> = queue.into_iter().map(|(m, _)| m.release()).collect();
    assert_eq!(last_flags, vec![false, false, true]);
    assert_eq!(emitter.singles.recycled(), 1);

    // The recycled envelope is reused for the next punctuation
    emitter.propagate_punctuation(43);
    assert_eq!(emitter.singles.available(), 0);
}

#[test]
fn test_broadcast_shares_one_envelope() {
    let mut emitter = Emitter::broadcast(3, 0);
    emitter.emit(9u64, 0, 1, 1);
    let queue = emitter.take_output_queue();
    let dests: Vec<usize> = queue.iter().map(|(_, d)| *d).collect();
    assert_eq!(dests, vec![0, 1, 2]);
    match &queue[0].0 {
        Message::Single(s) => assert_eq!(s.holders(), 3),
        other => panic!("unexpected message {other:?}"),
    }
    for (m, _) in queue {
        m.release();
    }
}

#[test]
fn test_broadcast_batches() {
    let mut emitter = Emitter::broadcast(2, 2);
    for v in 0..5u64 {
        emitter.emit(v, 0, v, v);
    }
    emitter.flush();
    let queue = emitter.take_output_queue();
    // Three batches (2, 2, 1), each delivered to both destinations
    assert_eq!(queue.len(), 6);
    let per_dest: usize = queue
        .iter()
        .filter(|(_, d)| *d == 1)
        .map(|(m, _)| m.num_tuples())
        .sum();
    assert_eq!(per_dest, 5);
    for (m, _) in queue {
        m.release();
    }
}

#[test]
fn test_round_robin_cycles() {
    let mut emitter = Emitter::round_robin(3, 0).with_punctuation_policy(quiet());
    for v in 0..6u64 {
        emitter.emit(v, 0, v, 0);
    }
    let dests: Vec<usize> = emitter.output_queue().iter().map(|(_, d)| *d).collect();
    assert_eq!(dests, vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_terminate_flushes_then_sends_end_of_stream() {
    let mut emitter = identity_keyed(2, 16).with_punctuation_policy(quiet());
    emitter.emit(0, 0, 1, 1);
    emitter.emit(1, 0, 1, 1);
    emitter.terminate();
    let queue = emitter.take_output_queue();
    let eos: Vec<usize> = queue
        .iter()
        .filter(|(m, _)| m.is_end_of_stream())
        .map(|(_, d)| *d)
        .collect();
    assert_eq!(eos, vec![0, 1]);
    assert!(queue[..queue.len() - 2].iter().all(|(m, _)| !m.is_end_of_stream()));
}

#[test]
fn test_clone_is_independent() {
    let mut original = identity_keyed(2, 4).with_punctuation_policy(quiet());
    original.set_tree_mode(true);
    original.emit(1, 0, 1, 1);

    let mut copy = original.clone();
    assert_eq!(copy.num_destinations(), 2);
    assert_eq!(copy.batch_size(), 4);
    assert!(copy.is_tree_mode());
    assert_eq!(copy.routing_mode(), RoutingMode::Keyed);
    assert_eq!(copy.pending_tuples(), 0);
    assert!(!copy.singles.same_pool(&original.singles));

    copy.emit(2, 0, 2, 2);
    copy.flush();
    assert_eq!(copy.output_queue().len(), 1);
    assert_eq!(original.pending_tuples(), 1);
    original.flush();
}

#[test]
fn test_emit_inplace_forwards_envelope() {
    let mut emitter = identity_keyed(2, 0).with_punctuation_policy(quiet());
    let envelope = Pooled::detached(Single::new(5u64, 3, 50, 40));
    emitter.emit_inplace(envelope);
    let (message, dest) = &emitter.output_queue()[0];
    assert_eq!(*dest, partition_of(hash_key(&5u64), 2));
    match message {
        Message::Single(s) => {
            assert_eq!(*s.tuple(), 5);
            assert_eq!(s.id(), 3);
            assert_eq!(s.timestamp(), 50);
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_emit_inplace_batched_moves_tuple() {
    let mut emitter = Emitter::forward(2).with_punctuation_policy(quiet());
    let shared = Pooled::detached(Single::new(String::from("a"), 0, 1, 1));
    let keep = shared.clone();
    emitter.emit_inplace(shared);
    emitter.emit_inplace(Pooled::detached(Single::new(String::from("b"), 0, 2, 2)));
    // The shared envelope was copied, not emptied
    assert_eq!(keep.tuple(), "a");

    let queue = emitter.take_output_queue();
    match &queue[0].0 {
        Message::Batch(b) => assert_eq!(b.tuples(), &["a".to_string(), "b".to_string()]),
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn test_connected_emitter_sends_on_lanes() {
    let (mut outlets, mut inlets) = mesh::<u64>(1, 2, &ChannelConfig::default());
    let mut emitter = Emitter::round_robin(2, 0).with_punctuation_policy(quiet());
    emitter.connect(outlets.remove(0));
    emitter.emit(10, 0, 1, 1);
    emitter.emit(11, 0, 2, 2);
    emitter.terminate();
    assert!(emitter.output_queue().is_empty());

    for (dest, expected) in [(0usize, 10u64), (1, 11)] {
        let (_, message) = inlets[dest].recv();
        assert_eq!(data_values(&message), vec![expected]);
        let (_, eos) = inlets[dest].recv();
        assert!(eos.is_end_of_stream());
    }
}

#[test]
fn test_tree_mode_buffers_even_when_connected() {
    let (mut outlets, inlets) = mesh::<u64>(1, 1, &ChannelConfig::default());
    let mut emitter = Emitter::forward(0);
    emitter.connect(outlets.remove(0));
    emitter.set_tree_mode(true);
    emitter.emit(1, 0, 1, 1);
    assert_eq!(emitter.output_queue().len(), 1);
    assert!(inlets[0].is_empty());
}

#[test]
#[should_panic(expected = "at least one destination")]
fn test_zero_destinations_rejected() {
    let _ = Emitter::<u64>::round_robin(0, 0);
}
