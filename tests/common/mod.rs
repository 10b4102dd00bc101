//! Common test utilities for the retention engine

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use steadyhand_core::{
    aggregation::{MinuteAggregator, SummaryBucket},
    error::{Error, Result},
    sample::{NewSample, Sample},
    storage::{
        duckdb::DuckDbBackend, memory::MemoryBackend, ArchiveOutcome, ArchiveStore,
        ExpiryPredicate, SampleStore, SampleStream, StorageBackendType, SummaryStore, TimeRange,
    },
};

/// 2024-01-01T00:00:00Z
pub fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    base() + Duration::seconds(secs)
}

pub fn sample_at(secs: i64) -> NewSample {
    NewSample::new(at(secs), (0.0, 0.0, 1.0), 20.0).unwrap()
}

/// One of each backend, both empty.
pub fn backends() -> Vec<(&'static str, StorageBackendType)> {
    vec![
        ("memory", StorageBackendType::Memory(MemoryBackend::new())),
        (
            "duckdb",
            StorageBackendType::DuckDb(DuckDbBackend::open_in_memory().unwrap()),
        ),
    ]
}

pub async fn fill<S: SampleStore + ?Sized>(store: &S, offsets: impl IntoIterator<Item = i64>) {
    for secs in offsets {
        store.insert(sample_at(secs)).await.unwrap();
    }
}

pub async fn scan_all<S: SampleStore + ?Sized>(store: &S) -> Vec<Sample> {
    store.scan_ordered_by_timestamp().try_collect().await.unwrap()
}

/// Memory backend whose archive unit can be made to fail on demand and whose
/// reported count can run ahead of the rows it actually holds.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryBackend,
    pub fail_archive: AtomicBool,
    pub phantom_rows: AtomicU64,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_archive.store(failing, Ordering::SeqCst);
    }

    /// Rows that `count` reports but no scan will ever yield.
    pub fn set_phantom_rows(&self, rows: u64) {
        self.phantom_rows.store(rows, Ordering::SeqCst);
    }
}

#[async_trait]
impl SampleStore for FlakyStore {
    async fn insert(&self, sample: NewSample) -> Result<i64> {
        self.inner.insert(sample).await
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.count().await? + self.phantom_rows.load(Ordering::SeqCst))
    }

    fn scan_ordered_by_timestamp(&self) -> SampleStream<'_> {
        self.inner.scan_ordered_by_timestamp()
    }

    async fn delete_where(&self, predicate: ExpiryPredicate) -> Result<u64> {
        self.inner.delete_where(predicate).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Sample>> {
        self.inner.recent(limit).await
    }

    async fn time_range(&self) -> Result<Option<TimeRange>> {
        self.inner.time_range().await
    }
}

#[async_trait]
impl SummaryStore for FlakyStore {
    async fn insert_bucket(&self, bucket: SummaryBucket) -> Result<()> {
        self.inner.insert_bucket(bucket).await
    }

    async fn buckets(&self) -> Result<Vec<SummaryBucket>> {
        self.inner.buckets().await
    }

    async fn bucket_count(&self) -> Result<u64> {
        self.inner.bucket_count().await
    }
}

#[async_trait]
impl ArchiveStore for FlakyStore {
    async fn archive_through(
        &self,
        through: DateTime<Utc>,
        aggregator: MinuteAggregator,
    ) -> Result<ArchiveOutcome> {
        if self.fail_archive.load(Ordering::SeqCst) {
            return Err(Error::store("archive", "connection reset by peer"));
        }
        self.inner.archive_through(through, aggregator).await
    }
}
