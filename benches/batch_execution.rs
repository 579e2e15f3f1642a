//! Benchmarks whole AVM batches across conflict levels and worker counts.

use avm_bench::{ConcurrentExecutor, Executor, SequentialExecutor, Workload, WorkloadConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn workload(conflict_factor: f64, contract_call_ratio: f64) -> Workload {
    Workload::generate(WorkloadConfig {
        num_accounts: 1000,
        num_transactions: 1000,
        conflict_factor,
        contract_call_ratio,
        ..WorkloadConfig::default()
    })
}

/// Benchmarks a mixed batch at different conflict factors, on 1 and 4 workers.
fn bench_conflict_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_execution/conflict_levels");
    group.sample_size(10);

    let sequential = SequentialExecutor::new();
    let concurrent = ConcurrentExecutor::new(4);

    for &conflict_factor in &[0.0, 0.25, 0.5, 0.75, 1.0] {
        let workload = workload(conflict_factor, 0.5);
        let label = format!("conflict_{:.0}%", conflict_factor * 100.0);

        group.throughput(Throughput::Elements(workload.transactions.len() as u64));
        for executor in [&sequential as &dyn Executor, &concurrent] {
            group.bench_with_input(
                BenchmarkId::new(executor.name(), &label),
                &workload,
                |b, workload| {
                    b.iter(|| {
                        let (_, result) = executor.execute(black_box(workload)).unwrap();
                        result.successful
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmarks a conflict-free batch with a growing worker pool.
fn bench_thread_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_execution/thread_counts");
    group.sample_size(10);

    let workload = workload(0.0, 0.5);
    group.throughput(Throughput::Elements(workload.transactions.len() as u64));

    for &threads in &[1, 2, 4, 8] {
        let executor = ConcurrentExecutor::new(threads);
        group.bench_with_input(BenchmarkId::new("concurrent", threads), &workload, |b, workload| {
            b.iter(|| {
                let (_, result) = executor.execute(black_box(workload)).unwrap();
                result.successful
            });
        });
    }

    group.finish();
}

/// Benchmarks plain transfers against contract calls.
fn bench_call_mix(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_execution/call_mix");
    group.sample_size(10);

    let executor = ConcurrentExecutor::new(4);
    for &ratio in &[0.0, 0.5, 1.0] {
        let workload = workload(0.0, ratio);
        group.throughput(Throughput::Elements(workload.transactions.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("concurrent", format!("calls_{:.0}%", ratio * 100.0)),
            &workload,
            |b, workload| {
                b.iter(|| {
                    let (_, result) = executor.execute(black_box(workload)).unwrap();
                    result.successful
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_conflict_levels, bench_thread_counts, bench_call_mix);
criterion_main!(benches);
