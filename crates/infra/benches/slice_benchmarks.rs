use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use forgebatch_core::{ExpectedVersion, JobId, QueueId};
use forgebatch_infra::coordinator::JobCoordinator;
use forgebatch_infra::queue::{InMemoryQueueStore, QueueStore};
use forgebatch_infra::snapshot::{InMemorySnapshotStore, JobSnapshotStore};
use forgebatch_jobs::{HandlerCall, HandlerRegistry, JobSpec, OperationSpec, Redirects, SliceOutcome};

fn rows(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("sku-{i};name-{i};price-{}", i % 97)).collect()
}

/// Consumes up to 50 items per invocation.
fn take_fifty(call: &HandlerCall<'_>) -> SliceOutcome {
    let limit = call.remaining().min(50);
    let mut taken = 0;
    while taken < limit {
        match call.next_item() {
            Ok(Some(item)) => {
                black_box(item);
                taken += 1;
            }
            _ => break,
        }
    }
    SliceOutcome::advance(taken).with_inserted(taken)
}

fn coordinator() -> JobCoordinator<InMemoryQueueStore, InMemorySnapshotStore> {
    let mut registry = HandlerRegistry::new();
    registry.register("import", take_fifty).unwrap();
    JobCoordinator::new(
        InMemoryQueueStore::new(),
        InMemorySnapshotStore::new(),
        Arc::new(registry),
    )
}

fn bench_queue_shift_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_shift_throughput");

    for item_count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*item_count as u64));
        group.bench_with_input(
            BenchmarkId::new("fill_and_drain", item_count),
            item_count,
            |b, &count| {
                let store = InMemoryQueueStore::new();
                let queue_id = QueueId::new("bench").unwrap();
                let items = rows(count);

                b.iter(|| {
                    store
                        .create_or_replace(&queue_id, items.clone(), None, true)
                        .unwrap();
                    while let Some(item) = store.shift_item(&queue_id).unwrap() {
                        black_box(item);
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_job_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_drain");

    for item_count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*item_count as u64));

        group.bench_with_input(
            BenchmarkId::new("single_slice", item_count),
            item_count,
            |b, &count| {
                let coordinator = coordinator();
                let id = JobId::new("bench-single").unwrap();
                let items = rows(count);

                b.iter(|| {
                    coordinator
                        .submit(
                            JobSpec::new("Bench")
                                .with_id(id.clone())
                                .with_operation(OperationSpec::new("import").with_items(items.clone())),
                        )
                        .unwrap();
                    let report = coordinator
                        .process_with_budget(&id, Duration::from_secs(60))
                        .unwrap()
                        .unwrap();
                    black_box(report);
                });
            },
        );

        // One handler invocation per poll: measures snapshot load/save overhead.
        group.bench_with_input(
            BenchmarkId::new("one_call_per_poll", item_count),
            item_count,
            |b, &count| {
                let coordinator = coordinator();
                let id = JobId::new("bench-polled").unwrap();
                let items = rows(count);

                b.iter(|| {
                    coordinator
                        .submit(
                            JobSpec::new("Bench")
                                .with_id(id.clone())
                                .with_operation(OperationSpec::new("import").with_items(items.clone())),
                        )
                        .unwrap();
                    loop {
                        let report = coordinator
                            .process_with_budget(&id, Duration::ZERO)
                            .unwrap()
                            .unwrap();
                        if report.finish {
                            break black_box(report);
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_snapshot_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_round_trip");
    group.sample_size(1000);

    for operation_count in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("save_and_load", operation_count),
            operation_count,
            |b, &count| {
                let store = InMemorySnapshotStore::new();
                let spec = (0..count).fold(
                    JobSpec::new("Bench").with_id(JobId::new("bench-snapshot").unwrap()),
                    |spec, _| spec.with_operation(OperationSpec::new("import").with_size(10)),
                );
                let (mut job, _) = spec.into_job(&Redirects::default()).unwrap();

                b.iter(|| {
                    job.version = store.save(&job, ExpectedVersion::Exact(job.version)).unwrap();
                    black_box(store.load(&job.id).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_shift_throughput,
    bench_job_drain,
    bench_snapshot_round_trip
);
criterion_main!(benches);
