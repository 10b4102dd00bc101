mod common;

use common::{at, backends, base, fill, scan_all, FlakyStore};
use std::sync::Arc;
use std::time::Duration;
use steadyhand_core::{
    compaction::Compactor,
    error::Error,
    retention::{CutoffTrigger, RetentionPolicy},
    sample::NewSample,
    storage::{SampleStore, StorageBackendType, SummaryStore},
};

fn compactor_for(store: &StorageBackendType, policy: RetentionPolicy) -> Compactor {
    Compactor::new(Arc::new(store.clone()), policy)
}

#[tokio::test]
async fn test_compliant_store_is_left_alone() {
    for (name, store) in backends() {
        fill(&store, 0..5).await;
        let before = scan_all(&store).await;
        let compactor = compactor_for(&store, RetentionPolicy::by_rows(10).unwrap());

        let result = compactor.compact_at(at(5)).await.unwrap();

        assert!(result.is_noop(), "{name}");
        assert_eq!(result.rows_removed, 0, "{name}");
        assert_eq!(scan_all(&store).await, before, "{name}");
        assert_eq!(store.bucket_count().await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn test_row_count_converges_in_one_run() {
    for (name, store) in backends() {
        fill(&store, 0..250).await;
        let compactor = compactor_for(&store, RetentionPolicy::by_rows(100).unwrap());

        let first = compactor.compact_at(base()).await.unwrap();
        assert_eq!(first.rows_removed, 150, "{name}");
        assert_eq!(store.count().await.unwrap(), 100, "{name}");

        let second = compactor.compact_at(base()).await.unwrap();
        assert!(second.is_noop(), "{name}");
        assert_eq!(store.count().await.unwrap(), 100, "{name}");
    }
}

#[tokio::test]
async fn test_archived_rows_are_conserved_across_runs() {
    for (name, store) in backends() {
        let compactor = compactor_for(&store, RetentionPolicy::by_rows(30).unwrap());
        let mut removed = 0;

        fill(&store, 0..100).await;
        let run = compactor.compact_at(base()).await.unwrap();
        assert_eq!(run.samples_summarized, run.rows_removed, "{name}");
        removed += run.rows_removed;

        fill(&store, 100..175).await;
        let run = compactor.compact_at(base()).await.unwrap();
        assert_eq!(run.samples_summarized, run.rows_removed, "{name}");
        removed += run.rows_removed;

        let summarized: u64 = store
            .buckets()
            .await
            .unwrap()
            .iter()
            .map(|b| b.sample_count)
            .sum();
        assert_eq!(removed, 145, "{name}");
        assert_eq!(summarized, removed, "{name}");
        assert_eq!(store.count().await.unwrap() + summarized, 175, "{name}");
    }
}

#[tokio::test]
async fn test_bucket_averages_magnitude_and_temperature() {
    for (name, store) in backends() {
        let axes = [(1.0, 0.0, 0.0), (0.0, 1.0, 0.0), (0.0, 0.0, 1.0)];
        for (i, (accel, temp)) in axes.into_iter().zip([10.0, 20.0, 30.0]).enumerate() {
            let sample = NewSample::new(at(i as i64), accel, temp).unwrap();
            store.insert(sample).await.unwrap();
        }
        // A later-minute sample that stays raw.
        fill(&store, [90]).await;

        let compactor = compactor_for(&store, RetentionPolicy::by_rows(1).unwrap());
        compactor.compact_at(base()).await.unwrap();

        let buckets = store.buckets().await.unwrap();
        assert_eq!(buckets.len(), 1, "{name}");
        assert_eq!(buckets[0].minute_start, base(), "{name}");
        assert_eq!(buckets[0].avg_accel_magnitude, 1.0, "{name}");
        assert_eq!(buckets[0].avg_temperature, 20.0, "{name}");
        assert_eq!(buckets[0].sample_count, 3, "{name}");
    }
}

#[tokio::test]
async fn test_boundary_ties_are_all_archived() {
    for (name, store) in backends() {
        fill(&store, [0, 1, 1, 1, 2, 3]).await;
        let compactor = compactor_for(&store, RetentionPolicy::by_rows(4).unwrap());

        let result = compactor.compact_at(base()).await.unwrap();
        let cutoff = result.cutoff.unwrap();
        assert_eq!(cutoff.instant, at(1), "{name}");

        // Every sample sharing the boundary timestamp goes, so the store
        // ends below max_rows.
        assert_eq!(result.rows_removed, 4, "{name}");
        let remaining = scan_all(&store).await;
        assert_eq!(remaining.len(), 2, "{name}");
        assert!(remaining.iter().all(|s| s.timestamp > cutoff.instant), "{name}");
    }
}

#[tokio::test]
async fn test_arrival_order_does_not_change_outcome() {
    let offsets: Vec<i64> = (0..130).map(|i| (i * 37) % 130).collect();
    let mut reversed = offsets.clone();
    reversed.reverse();

    for ((name, forward), (_, backward)) in backends().into_iter().zip(backends()) {
        fill(&forward, offsets.iter().copied()).await;
        fill(&backward, reversed.iter().copied()).await;

        let policy = RetentionPolicy::by_rows(50).unwrap();
        compactor_for(&forward, policy).compact_at(base()).await.unwrap();
        compactor_for(&backward, policy).compact_at(base()).await.unwrap();

        assert_eq!(
            forward.buckets().await.unwrap(),
            backward.buckets().await.unwrap(),
            "{name}"
        );
        let stamps = |samples: Vec<steadyhand_core::Sample>| {
            samples.into_iter().map(|s| s.timestamp).collect::<Vec<_>>()
        };
        assert_eq!(
            stamps(scan_all(&forward).await),
            stamps(scan_all(&backward).await),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_seventy_samples_trimmed_to_sixty() {
    for (name, store) in backends() {
        fill(&store, 0..70).await;
        let compactor = compactor_for(&store, RetentionPolicy::by_rows(60).unwrap());

        let result = compactor.compact_at(at(70)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 60, "{name}");
        assert_eq!(result.rows_removed, 10, "{name}");
        assert_eq!(
            result.cutoff.unwrap().trigger,
            CutoffTrigger::Count {
                population: 70,
                max_rows: 60,
                excess: 10
            },
            "{name}"
        );

        let buckets = store.buckets().await.unwrap();
        assert_eq!(buckets.len(), 1, "{name}");
        assert_eq!(buckets[0].minute_start, base(), "{name}");
        assert_eq!(buckets[0].sample_count, 10, "{name}");
        assert_eq!(buckets[0].avg_accel_magnitude, 1.0, "{name}");

        let oldest = store.time_range().await.unwrap().unwrap().oldest;
        assert_eq!(oldest, at(10), "{name}");
    }
}

#[tokio::test]
async fn test_age_policy_archives_everything_past_max_age() {
    for (name, store) in backends() {
        fill(&store, 0..180).await;
        let compactor = compactor_for(
            &store,
            RetentionPolicy::by_age(Duration::from_secs(60)).unwrap(),
        );

        let result = compactor.compact_at(at(150)).await.unwrap();

        assert_eq!(result.cutoff.unwrap().instant, at(90), "{name}");
        assert_eq!(result.rows_removed, 91, "{name}");
        let counts: Vec<u64> = store
            .buckets()
            .await
            .unwrap()
            .iter()
            .map(|b| b.sample_count)
            .collect();
        assert_eq!(counts, vec![60, 31], "{name}");
        assert_eq!(store.time_range().await.unwrap().unwrap().oldest, at(91), "{name}");
    }
}

#[tokio::test]
async fn test_minute_split_across_runs_matches_single_pass() {
    for ((name, split), (_, single)) in backends().into_iter().zip(backends()) {
        let temps = [12.0, 18.5, 21.0, 9.5, 30.25, 14.0];
        for store in [&split, &single] {
            for (i, temp) in temps.iter().enumerate() {
                let sample = NewSample::new(at(i as i64 * 5), (0.0, 3.0, 4.0), *temp).unwrap();
                store.insert(sample).await.unwrap();
            }
            // Keeps one raw row after the minute is fully archived.
            fill(store, [100]).await;
        }

        let policy = RetentionPolicy::by_rows(1).unwrap();
        let partial = RetentionPolicy::by_rows(4).unwrap();
        compactor_for(&split, partial).compact_at(base()).await.unwrap();
        compactor_for(&split, policy).compact_at(base()).await.unwrap();
        compactor_for(&single, policy).compact_at(base()).await.unwrap();

        let merged = split.buckets().await.unwrap();
        let whole = single.buckets().await.unwrap();
        assert_eq!(merged.len(), 1, "{name}");
        assert_eq!(merged[0].sample_count, whole[0].sample_count, "{name}");
        assert_eq!(merged[0].avg_accel_magnitude, 5.0, "{name}");
        assert!(
            (merged[0].avg_temperature - whole[0].avg_temperature).abs() < 1e-9,
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_failed_archive_surfaces_context_and_recovers() {
    let store = Arc::new(FlakyStore::default());
    fill(store.as_ref(), 0..20).await;
    let compactor = Compactor::new(store.clone(), RetentionPolicy::by_rows(5).unwrap());

    store.set_failing(true);
    let err = compactor.compact_at(base()).await.unwrap_err();
    match &err {
        Error::Compaction {
            boundary,
            population,
            source,
        } => {
            assert_eq!(*boundary, at(14));
            assert_eq!(*population, 20);
            assert!(matches!(**source, Error::StoreUnavailable { .. }));
        }
        other => panic!("expected a compaction error, got {other}"),
    }
    assert!(err.is_transient());
    assert_eq!(store.count().await.unwrap(), 20);
    assert_eq!(store.bucket_count().await.unwrap(), 0);

    store.set_failing(false);
    let result = compactor.compact_at(base()).await.unwrap();
    assert_eq!(result.rows_removed, 15);
    assert_eq!(store.count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_unresolvable_boundary_defers_to_next_run() {
    let store = Arc::new(FlakyStore::default());
    fill(store.as_ref(), 0..3).await;
    let before = scan_all(store.as_ref()).await;
    let compactor = Compactor::new(store.clone(), RetentionPolicy::by_rows(1).unwrap());

    // The count says 13 rows, so ordinal 12 does not exist in the scan.
    store.set_phantom_rows(10);
    let result = compactor.compact_at(base()).await.unwrap();

    assert!(result.is_noop());
    assert_eq!(result.rows_removed, 0);
    assert_eq!(scan_all(store.as_ref()).await, before);
    assert_eq!(store.bucket_count().await.unwrap(), 0);

    store.set_phantom_rows(0);
    let result = compactor.compact_at(base()).await.unwrap();
    assert_eq!(result.rows_removed, 2);
    assert_eq!(store.inner.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_double_archive() {
    for (name, store) in backends() {
        fill(&store, 0..200).await;
        let compactor = Arc::new(compactor_for(&store, RetentionPolicy::by_rows(50).unwrap()));

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let compactor = compactor.clone();
                tokio::spawn(async move { compactor.compact_at(base()).await })
            })
            .collect();

        let mut removed = 0;
        let mut noops = 0;
        for run in runs {
            let result = run.await.unwrap().unwrap();
            removed += result.rows_removed;
            if result.is_noop() {
                noops += 1;
            }
        }

        assert_eq!(removed, 150, "{name}");
        assert_eq!(noops, 3, "{name}");
        assert_eq!(store.count().await.unwrap(), 50, "{name}");
    }
}
