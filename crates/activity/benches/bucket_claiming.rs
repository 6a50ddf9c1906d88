//! Bucket claiming benchmark
//!
//! Measures the claim → complete cycle against the in-memory work-state
//! store: every claim and completion is a conditional write of the
//! activity's work-state document.

use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;
use uuid::Uuid;

use govrun_activity::bucketing::{BucketManager, BucketingSpecification, InputSpace};
use govrun_activity::persistence::{InMemoryWorkStateStore, WorkStateHandle};
use govrun_activity::processing::ItemStatistics;
use govrun_activity::ActivityPath;

fn manager(store: Arc<InMemoryWorkStateStore>) -> Arc<BucketManager> {
    let handle = WorkStateHandle::new(store, Uuid::now_v7(), ActivityPath::from_segments(["bench"]));
    Arc::new(BucketManager::new(Arc::new(handle)))
}

/// Single worker claiming and completing every bucket
fn bench_claim_single(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("bucket_claiming/single");

    for buckets in [10u64, 100, 500] {
        group.throughput(Throughput::Elements(buckets));
        group.bench_with_input(BenchmarkId::new("buckets", buckets), &buckets, |b, &buckets| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = std::time::Duration::ZERO;

                for _ in 0..iters {
                    let manager = manager(Arc::new(InMemoryWorkStateStore::new()));
                    manager
                        .initialize(
                            &InputSpace::inclusive(1, buckets * 10),
                            &BucketingSpecification::numeric(10),
                        )
                        .await
                        .unwrap();

                    let start = Instant::now();
                    while let Some(bucket) = manager.get_next_bucket("worker-1").await.unwrap() {
                        manager
                            .complete_bucket(&bucket, &ItemStatistics::default(), None)
                            .await
                            .unwrap();
                    }
                    total += start.elapsed();
                }

                total
            });
        });
    }

    group.finish();
}

/// Several workers competing for the same bucket list
fn bench_claim_concurrent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("bucket_claiming/concurrent");
    group.sample_size(20);

    let buckets = 200u64;
    for workers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(buckets));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            b.to_async(&rt).iter(|| async move {
                let manager = manager(Arc::new(InMemoryWorkStateStore::new()));
                manager
                    .initialize(
                        &InputSpace::inclusive(1, buckets * 10),
                        &BucketingSpecification::numeric(10),
                    )
                    .await
                    .unwrap();

                let handles: Vec<_> = (0..workers)
                    .map(|w| {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            let worker_id = format!("worker-{w}");
                            let mut completed = 0u64;
                            while let Some(bucket) = manager.get_next_bucket(&worker_id).await.unwrap() {
                                manager
                                    .complete_bucket(&bucket, &ItemStatistics::default(), None)
                                    .await
                                    .unwrap();
                                completed += 1;
                            }
                            completed
                        })
                    })
                    .collect();

                let mut completed = 0;
                for handle in handles {
                    completed += handle.await.unwrap();
                }
                assert_eq!(completed, buckets);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_claim_single, bench_claim_concurrent);
criterion_main!(benches);
