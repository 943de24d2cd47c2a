//! Emitter benchmarks
//!
//! Measures routing, batching and punctuation overhead per tuple with the
//! output buffered in the emitter's queue.
//!
//! Run with: cargo bench --bench emitter_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use windlane_core::{Emitter, KeyExtractor, Message};

const TUPLES: u64 = 10_000;

fn drain(emitter: &mut Emitter<(u64, u64)>) {
    for (message, _) in emitter.take_output_queue() {
        message.release();
    }
}

/// Keyed routing, per tuple and batched
fn bench_keyed(c: &mut Criterion) {
    let mut group = c.benchmark_group("emitter_keyed");
    group.throughput(Throughput::Elements(TUPLES));

    for batch_size in [0usize, 16, 256] {
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                let extractor = KeyExtractor::new(|t: &(u64, u64)| t.0);
                let mut emitter = Emitter::keyed(extractor, 8, batch_size);
                b.iter(|| {
                    for i in 0..TUPLES {
                        emitter.emit(black_box((i % 1024, i)), i, i, 0);
                    }
                    emitter.flush();
                    drain(&mut emitter);
                });
            },
        );
    }

    group.finish();
}

/// Broadcast shares one envelope between all destinations
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("emitter_broadcast");
    group.throughput(Throughput::Elements(TUPLES));

    for dests in [2usize, 8] {
        group.bench_with_input(BenchmarkId::new("dests", dests), &dests, |b, &dests| {
            let mut emitter = Emitter::broadcast(dests, 0);
            b.iter(|| {
                for i in 0..TUPLES {
                    emitter.emit(black_box((i, i)), i, i, 0);
                }
                drain(&mut emitter);
            });
        });
    }

    group.finish();
}

/// Punctuation rounds with every destination idle
fn bench_punctuation(c: &mut Criterion) {
    let mut group = c.benchmark_group("emitter_punctuation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("propagate", |b| {
        let mut emitter: Emitter<(u64, u64)> = Emitter::round_robin(8, 32);
        let mut wm = 0;
        b.iter(|| {
            wm += 1;
            emitter.propagate_punctuation(black_box(wm));
            for (message, _) in emitter.take_output_queue() {
                black_box(matches!(message, Message::Batch(_)));
                message.release();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_keyed, bench_broadcast, bench_punctuation);
criterion_main!(benches);
