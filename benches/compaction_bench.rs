//! Benchmarks for compaction over the in-process backend

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::sync::Arc;
use steadyhand_core::{
    aggregation::summarize,
    compaction::Compactor,
    retention::RetentionPolicy,
    sample::{NewSample, Sample},
    storage::{memory::MemoryBackend, SampleStore},
};

fn new_sample(i: i64) -> NewSample {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let wobble = (i % 17) as f64 * 0.01;
    NewSample::new(
        base + Duration::milliseconds(i * 20),
        (wobble, -wobble, 9.81),
        21.0 + wobble,
    )
    .unwrap()
}

fn filled_store(rows: i64) -> MemoryBackend {
    let store = MemoryBackend::new();
    futures::executor::block_on(async {
        for i in 0..rows {
            store.insert(new_sample(i)).await.unwrap();
        }
    });
    store
}

fn bench_compaction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("compaction");

    for rows in [1_000i64, 10_000, 50_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            b.to_async(&rt).iter_batched(
                || {
                    Compactor::new(
                        Arc::new(filled_store(rows)),
                        RetentionPolicy::by_rows(100).unwrap(),
                    )
                },
                |compactor| async move { black_box(compactor.compact().await.unwrap()) },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_minute_summaries(c: &mut Criterion) {
    let samples: Vec<Sample> = (0..30_000).map(|i| new_sample(i).into_sample(i)).collect();

    c.bench_function("summarize_30k_samples", |b| {
        b.iter(|| summarize(black_box(&samples)))
    });
}

criterion_group!(benches, bench_compaction, bench_minute_summaries);
criterion_main!(benches);
