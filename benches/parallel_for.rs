//! Throughput benchmark: parallel_for over a large range, pool booted per
//! iteration so the measurement includes scheduling overhead end to end.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft::{bind, JobSystem};

const RANGE: usize = 100_000;

fn bench_parallel_for(c: &mut Criterion) {
    let threads = num_cpus::get();

    let mut group = c.benchmark_group("parallel_for");
    group.throughput(Throughput::Elements(RANGE as u64));
    group.sample_size(10);

    group.bench_function(BenchmarkId::new("sum_range", threads), |b| {
        b.iter(|| {
            let total = Arc::new(AtomicUsize::new(0));
            let sink = Arc::clone(&total);
            JobSystem::start_sync(threads, move |sys| {
                let sink = Arc::clone(&sink);
                sys.parallel_for(0, RANGE, move |i| {
                    sink.fetch_add(i, Ordering::Relaxed);
                });
            });
            assert_eq!(total.load(Ordering::Relaxed), (0..RANGE).sum::<usize>());
        })
    });

    group.finish();
}

fn bench_call_round_trip(c: &mut Criterion) {
    let threads = num_cpus::get();

    let mut group = c.benchmark_group("call");
    group.sample_size(10);

    group.bench_function(BenchmarkId::new("round_trips_1k", threads), |b| {
        b.iter(|| {
            JobSystem::start_sync(threads, |sys| {
                for _ in 0..1_000 {
                    sys.call([bind(|| {})]);
                }
            });
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parallel_for, bench_call_round_trip);
criterion_main!(benches);
