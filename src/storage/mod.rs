//! Storage backends for raw samples and minute summaries.
//!
//! This module provides two backend implementations:
//! - `duckdb`: embedded DuckDB database holding both tables, so the archive
//!   unit is a single SQL transaction
//! - `memory`: process-local tables behind one lock, for tests and dry runs
//!
//! Each backend implements [`SampleStore`], [`SummaryStore`] and
//! [`ArchiveStore`]. [`StorageBackendType`] selects one at runtime from
//! configuration.

pub mod duckdb;
pub mod memory;

use self::{duckdb::DuckDbBackend, memory::MemoryBackend};

use crate::aggregation::{MinuteAggregator, SummaryBucket};
use crate::config::StorageSettings;
use crate::error::{Error, Result};
use crate::sample::{NewSample, Sample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;

/// Lazily produced samples in ascending `(timestamp, sequence_id)` order.
pub type SampleStream<'a> = BoxStream<'a, Result<Sample>>;

/// Rows per page when streaming an ordered scan.
pub const SCAN_PAGE_SIZE: usize = 1024;

/// The logical condition shared by the archive read step and delete step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPredicate {
    /// Samples with `timestamp <= through` are expired.
    pub through: DateTime<Utc>,
    /// When set, only samples with `sequence_id <= max_sequence_id` match.
    pub max_sequence_id: Option<i64>,
}

impl ExpiryPredicate {
    pub fn through(through: DateTime<Utc>) -> Self {
        Self {
            through,
            max_sequence_id: None,
        }
    }

    pub fn pinned_to(self, max_sequence_id: i64) -> Self {
        Self {
            max_sequence_id: Some(max_sequence_id),
            ..self
        }
    }

    pub fn matches(&self, sample: &Sample) -> bool {
        sample.timestamp <= self.through
            && self
                .max_sequence_id
                .map_or(true, |max| sample.sequence_id <= max)
    }
}

/// What one archive unit committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    /// Buckets produced from this run's samples, before merging with any
    /// previously stored bucket for the same minute.
    pub buckets: Vec<SummaryBucket>,
    pub rows_removed: u64,
}

impl ArchiveOutcome {
    pub fn samples_summarized(&self) -> u64 {
        self.buckets.iter().map(|b| b.sample_count).sum()
    }
}

/// Oldest and newest raw sample timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

/// Append-only table of raw samples keyed by arrival order.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Appends a sample and returns its assigned sequence id.
    async fn insert(&self, sample: NewSample) -> Result<i64>;

    /// Total raw samples currently stored.
    async fn count(&self) -> Result<u64>;

    /// Streams every sample ordered by timestamp, ties by sequence id.
    fn scan_ordered_by_timestamp(&self) -> SampleStream<'_>;

    /// Removes every sample matching the predicate.
    async fn delete_where(&self, predicate: ExpiryPredicate) -> Result<u64>;

    /// Timestamp of the sample at a 1-indexed position in timestamp order.
    async fn timestamp_at_ordinal(&self, ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        if ordinal == 0 {
            return Ok(None);
        }
        let mut stream = self
            .scan_ordered_by_timestamp()
            .skip((ordinal - 1) as usize);
        match stream.next().await {
            Some(sample) => Ok(Some(sample?.timestamp)),
            None => Ok(None),
        }
    }

    /// Most recently inserted samples, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Sample>>;

    /// Oldest and newest timestamps, `None` when empty.
    async fn time_range(&self) -> Result<Option<TimeRange>>;
}

/// Table of per-minute aggregates.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Stores a bucket, merging into an existing bucket for the same minute.
    async fn insert_bucket(&self, bucket: SummaryBucket) -> Result<()>;

    /// All buckets ordered by `minute_start`.
    async fn buckets(&self) -> Result<Vec<SummaryBucket>>;

    async fn bucket_count(&self) -> Result<u64>;
}

/// A backend able to summarize and delete expired samples as one unit.
#[async_trait]
pub trait ArchiveStore: SampleStore + SummaryStore {
    /// Feeds every sample with `timestamp <= through` to `aggregator`, stores
    /// the resulting buckets, then deletes exactly the samples that were fed.
    ///
    /// Buckets are written before the delete, and either both happen or
    /// neither does.
    async fn archive_through(
        &self,
        through: DateTime<Utc>,
        aggregator: MinuteAggregator,
    ) -> Result<ArchiveOutcome>;
}

/// Runtime-selected storage backend.
#[derive(Clone)]
pub enum StorageBackendType {
    DuckDb(DuckDbBackend),
    Memory(MemoryBackend),
}

impl StorageBackendType {
    /// Opens the backend named by `settings.engine`.
    pub fn open(settings: &StorageSettings) -> Result<Self> {
        match settings.engine.as_str() {
            "duckdb" => Ok(StorageBackendType::DuckDb(DuckDbBackend::open(&settings.path)?)),
            "memory" => Ok(StorageBackendType::Memory(MemoryBackend::new())),
            other => Err(Error::Config(format!(
                "Unsupported storage engine '{}' (expected duckdb or memory)",
                other
            ))),
        }
    }
}

impl AsRef<dyn ArchiveStore> for StorageBackendType {
    fn as_ref(&self) -> &(dyn ArchiveStore + 'static) {
        match self {
            StorageBackendType::DuckDb(backend) => backend,
            StorageBackendType::Memory(backend) => backend,
        }
    }
}

#[async_trait]
impl SampleStore for StorageBackendType {
    async fn insert(&self, sample: NewSample) -> Result<i64> {
        self.as_ref().insert(sample).await
    }

    async fn count(&self) -> Result<u64> {
        self.as_ref().count().await
    }

    fn scan_ordered_by_timestamp(&self) -> SampleStream<'_> {
        self.as_ref().scan_ordered_by_timestamp()
    }

    async fn delete_where(&self, predicate: ExpiryPredicate) -> Result<u64> {
        self.as_ref().delete_where(predicate).await
    }

    async fn timestamp_at_ordinal(&self, ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        self.as_ref().timestamp_at_ordinal(ordinal).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Sample>> {
        self.as_ref().recent(limit).await
    }

    async fn time_range(&self) -> Result<Option<TimeRange>> {
        self.as_ref().time_range().await
    }
}

#[async_trait]
impl SummaryStore for StorageBackendType {
    async fn insert_bucket(&self, bucket: SummaryBucket) -> Result<()> {
        self.as_ref().insert_bucket(bucket).await
    }

    async fn buckets(&self) -> Result<Vec<SummaryBucket>> {
        self.as_ref().buckets().await
    }

    async fn bucket_count(&self) -> Result<u64> {
        self.as_ref().bucket_count().await
    }
}

#[async_trait]
impl ArchiveStore for StorageBackendType {
    async fn archive_through(
        &self,
        through: DateTime<Utc>,
        aggregator: MinuteAggregator,
    ) -> Result<ArchiveOutcome> {
        self.as_ref().archive_through(through, aggregator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_predicate_pins_sequence() {
        let through = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let sample = |seq, secs| Sample {
            sequence_id: seq,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            accel_x: 0.0,
            accel_y: 0.0,
            accel_z: 0.0,
            temperature: 0.0,
        };

        let open = ExpiryPredicate::through(through);
        assert!(open.matches(&sample(50, 10)));
        assert!(!open.matches(&sample(1, 11)));

        let pinned = open.pinned_to(20);
        assert!(pinned.matches(&sample(20, 5)));
        assert!(!pinned.matches(&sample(21, 5)));
    }

    #[test]
    fn test_open_rejects_unknown_engine() {
        let settings = StorageSettings {
            engine: "postgres".into(),
            path: ":memory:".into(),
        };
        match StorageBackendType::open(&settings) {
            Err(Error::Config(msg)) => assert!(msg.contains("postgres")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("postgres engine should be rejected"),
        }
    }
}
