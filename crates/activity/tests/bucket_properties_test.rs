//! Property tests for bucket partitioning and claiming

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use govrun_activity::bucketing::{
    validate_partition, BucketManager, BucketRange, BucketingSpecification, InputSpace,
};
use govrun_activity::persistence::{InMemoryWorkStateStore, WorkStateHandle};
use govrun_activity::processing::ItemStatistics;
use govrun_activity::ActivityPath;

proptest! {
    #[test]
    fn numeric_buckets_partition_the_space(
        from in 0u64..1_000,
        len in 0u64..5_000,
        size in 1u64..700,
    ) {
        let space = InputSpace::Numeric { from, to_exclusive: from + len };
        let ranges = BucketingSpecification::numeric(size).partition(&space);

        prop_assert!(validate_partition(&space, &ranges).is_ok());
        let covered: u64 = ranges.iter().filter_map(BucketRange::len).sum();
        prop_assert_eq!(covered, len);
        prop_assert!(ranges.iter().all(|r| r.len().unwrap_or(0) <= size));
    }

    #[test]
    fn enumerated_buckets_keep_every_value_once(
        values in proptest::collection::hash_set("[a-z]{1,8}", 0..200),
        per_bucket in 1usize..50,
    ) {
        let values: Vec<String> = values.into_iter().collect();
        let space = InputSpace::Enumerated { values: values.clone() };
        let ranges = BucketingSpecification::enumerated(per_bucket).partition(&space);

        prop_assert!(validate_partition(&space, &ranges).is_ok());
        let flattened: Vec<String> = ranges
            .into_iter()
            .flat_map(|r| match r {
                BucketRange::Enumerated { values } => values,
                BucketRange::Numeric { .. } => Vec::new(),
            })
            .collect();
        prop_assert_eq!(flattened, values);
    }

    #[test]
    fn bucket_numbers_are_consecutive_from_one(len in 1u64..2_000, size in 1u64..100) {
        let buckets = BucketingSpecification::numeric(size)
            .buckets_for(&InputSpace::Numeric { from: 0, to_exclusive: len });
        for (i, bucket) in buckets.iter().enumerate() {
            prop_assert_eq!(bucket.sequential_number as usize, i + 1);
        }
    }
}

/// Competing workers never complete a bucket twice, and every bucket ends complete
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claiming_completes_each_bucket_once() {
    let store = Arc::new(InMemoryWorkStateStore::new());
    let task_id = Uuid::now_v7();
    let path = ActivityPath::from_segments(["import"]);

    manager(&store, task_id, &path)
        .initialize(
            &InputSpace::inclusive(1, 500),
            &BucketingSpecification::numeric(10),
        )
        .await
        .unwrap();

    // One manager (and work-state handle) per worker, as in separate processes
    let handles: Vec<_> = (0..8)
        .map(|w| {
            let manager = manager(&store, task_id, &path);
            tokio::spawn(async move {
                let worker_id = format!("worker-{w}");
                let mut completed = Vec::new();
                while let Some(bucket) = manager.get_next_bucket(&worker_id).await.unwrap() {
                    if manager
                        .complete_bucket(&bucket, &ItemStatistics::default(), None)
                        .await
                        .unwrap()
                    {
                        completed.push(bucket.sequential_number);
                    }
                }
                completed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }

    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(all.len(), 50);
    assert_eq!(unique.len(), 50);

    let buckets = manager(&store, task_id, &path).buckets().await.unwrap();
    assert!(buckets.iter().all(|b| b.is_complete()));
}

fn manager(store: &Arc<InMemoryWorkStateStore>, task_id: Uuid, path: &ActivityPath) -> BucketManager {
    let handle = WorkStateHandle::new(store.clone(), task_id, path.clone()).with_max_conflict_retries(1_000);
    BucketManager::new(Arc::new(handle))
}
