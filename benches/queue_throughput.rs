//! Job queue and office throughput benchmark.
//!
//! Measures raw enqueue/dequeue cost and end-to-end latency of short
//! processes using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use office_kernel::kernel::{JobContext, JobDefinition, JobOutcome, JobQueue, Office};
use office_kernel::Config;
use serde_json::json;
use std::sync::Arc;

fn bench_queue(c: &mut Criterion) {
    let batch_sizes: &[usize] = &[1, 64, 1024];

    let mut group = c.benchmark_group("job_queue");
    for &size in batch_sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            let queue = JobQueue::new();
            b.iter(|| {
                for i in 0..n {
                    queue.enqueue(black_box(i));
                }
                while queue.dequeue().is_some() {}
            });
        });
    }
    group.finish();
}

fn bench_contended_queue(c: &mut Criterion) {
    c.bench_function("job_queue_4_producers", |b| {
        let queue = Arc::new(JobQueue::new());
        b.iter(|| {
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let queue = queue.clone();
                    std::thread::spawn(move || {
                        for i in 0..256u32 {
                            queue.enqueue(i);
                        }
                    })
                })
                .collect();
            for producer in producers {
                producer.join().unwrap();
            }
            black_box(queue.drain().len())
        });
    });
}

fn bench_process_round_trip(c: &mut Criterion) {
    let mut builder = Office::builder(Config::default());
    builder.team("a", 2).team("b", 2);
    let first = builder.job(JobDefinition::function("first", "a", |ctx: &mut JobContext<'_>| {
        JobOutcome::Complete(ctx.parameter().clone())
    }));
    let second = builder.job(JobDefinition::function("second", "b", |ctx: &mut JobContext<'_>| {
        JobOutcome::Complete(ctx.parameter().clone())
    }));
    builder.link_next(first, second).entry_point("bench", first);
    let office = builder.start().unwrap();

    c.bench_function("process_two_jobs_two_teams", |b| {
        b.iter(|| {
            let handle = office.invoke_process("bench", json!(1), None).unwrap();
            black_box(handle.wait().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_queue,
    bench_contended_queue,
    bench_process_round_trip
);
criterion_main!(benches);
