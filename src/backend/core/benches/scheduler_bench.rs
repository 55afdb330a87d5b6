//! Benchmarks for the batch scheduler
//!
//! Run with: cargo bench

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use transmute_core::batch::{
    Batch, ConversionInput, ConversionOutput, InMemoryPersistenceSink, Job, JobStatus,
    PersistenceSynchronizer, RetryPolicy, Scheduler,
};
use transmute_core::service::{ConversionError, ConversionService};

struct Echo;

#[async_trait]
impl ConversionService for Echo {
    async fn convert(&self, input: &ConversionInput) -> Result<ConversionOutput, ConversionError> {
        Ok(ConversionOutput::new(input.content.clone()))
    }
}

fn inputs(count: usize) -> Vec<ConversionInput> {
    (0..count)
        .map(|i| ConversionInput::new(format!("file-{}.cbl", i), format!("MOVE {} TO X.", i)))
        .collect()
}

/// Benchmark a whole batch through the scheduler with varying sizes.
fn bench_batch_throughput(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch_throughput");

    for job_count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*job_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(job_count),
            job_count,
            |b, &count| {
                b.to_async(&runtime).iter(|| async move {
                    let scheduler = Scheduler::builder(Arc::new(Echo)).build();
                    let handle = scheduler
                        .submit(
                            Batch::from_inputs(inputs(count))
                                .with_concurrency_limit(16)
                                .with_retry_policy(RetryPolicy::new(1, Duration::ZERO)),
                        )
                        .unwrap();
                    black_box(handle.wait().await)
                });
            },
        );
    }
    group.finish();
}

/// Benchmark concurrency limits for a fixed batch size.
fn bench_concurrency_limit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrency_limit");

    for limit in [1, 4, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(limit), limit, |b, &limit| {
            b.to_async(&runtime).iter(|| async move {
                let scheduler = Scheduler::builder(Arc::new(Echo)).build();
                let handle = scheduler
                    .submit(Batch::from_inputs(inputs(200)).with_concurrency_limit(limit))
                    .unwrap();
                black_box(handle.wait().await)
            });
        });
    }
    group.finish();
}

/// Benchmark record upserts, first write versus unchanged rewrite.
fn bench_persistence_sync(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("persistence_sync");

    let mut job = Job::new(ConversionInput::new("bench.cbl", "DISPLAY 'HI'."));
    job.transition_to(JobStatus::Queued).unwrap();
    job.transition_to(JobStatus::Running).unwrap();
    job.mark_succeeded(ConversionOutput::new("print('HI')")).unwrap();
    let job = Arc::new(job);

    group.bench_function("insert", |b| {
        let job = job.clone();
        b.to_async(&runtime).iter(|| {
            let job = job.clone();
            async move {
                let sync = PersistenceSynchronizer::new(Arc::new(InMemoryPersistenceSink::new()));
                black_box(sync.sync("bench", &job).await.unwrap())
            }
        });
    });

    let sync = Arc::new(PersistenceSynchronizer::new(Arc::new(
        InMemoryPersistenceSink::new(),
    )));
    group.bench_function("unchanged", |b| {
        let job = job.clone();
        let sync = sync.clone();
        b.to_async(&runtime).iter(|| {
            let job = job.clone();
            let sync = sync.clone();
            async move { black_box(sync.sync("bench", &job).await.unwrap()) }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_batch_throughput,
    bench_concurrency_limit,
    bench_persistence_sync,
);
criterion_main!(benches);
