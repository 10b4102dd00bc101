//! Process-local backend.
//!
//! Both tables sit behind one lock, so every operation (including the
//! archive unit) is trivially atomic. Nothing survives the process.

use crate::aggregation::{MinuteAggregator, SummaryBucket};
use crate::error::{Error, Result};
use crate::sample::{NewSample, Sample};
use crate::storage::{
    ArchiveOutcome, ArchiveStore, ExpiryPredicate, SampleStore, SampleStream, SummaryStore,
    TimeRange,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tables {
    next_sequence_id: i64,
    /// Keyed by sequence id, i.e. arrival order.
    samples: BTreeMap<i64, Sample>,
    summaries: BTreeMap<DateTime<Utc>, SummaryBucket>,
}

impl Tables {
    fn ordered_samples(&self) -> Vec<Sample> {
        let mut ordered: Vec<Sample> = self.samples.values().cloned().collect();
        ordered.sort_by(|a, b| {
            (a.timestamp, a.sequence_id).cmp(&(b.timestamp, b.sequence_id))
        });
        ordered
    }

    fn upsert(&mut self, bucket: SummaryBucket) {
        self.summaries
            .entry(bucket.minute_start)
            .and_modify(|existing| *existing = existing.merge(&bucket))
            .or_insert(bucket);
    }

    fn remove_matching(&mut self, predicate: ExpiryPredicate) -> u64 {
        let before = self.samples.len();
        self.samples.retain(|_, sample| !predicate.matches(sample));
        (before - self.samples.len()) as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SampleStore for MemoryBackend {
    async fn insert(&self, sample: NewSample) -> Result<i64> {
        let mut tables = self.tables.write();
        tables.next_sequence_id += 1;
        let sequence_id = tables.next_sequence_id;
        tables.samples.insert(sequence_id, sample.into_sample(sequence_id));
        Ok(sequence_id)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.tables.read().samples.len() as u64)
    }

    fn scan_ordered_by_timestamp(&self) -> SampleStream<'_> {
        // Snapshot under the read lock; the stream never holds the lock.
        let snapshot = self.tables.read().ordered_samples();
        Box::pin(stream::iter(snapshot.into_iter().map(Ok)))
    }

    async fn delete_where(&self, predicate: ExpiryPredicate) -> Result<u64> {
        Ok(self.tables.write().remove_matching(predicate))
    }

    async fn timestamp_at_ordinal(&self, ordinal: u64) -> Result<Option<DateTime<Utc>>> {
        if ordinal == 0 {
            return Ok(None);
        }
        let tables = self.tables.read();
        let mut stamps: Vec<DateTime<Utc>> =
            tables.samples.values().map(|s| s.timestamp).collect();
        stamps.sort_unstable();
        let index = usize::try_from(ordinal - 1)
            .map_err(|_| Error::BoundaryUnresolvable {
                ordinal,
                population: stamps.len() as u64,
            })?;
        Ok(stamps.get(index).copied())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Sample>> {
        let tables = self.tables.read();
        Ok(tables.samples.values().rev().take(limit).cloned().collect())
    }

    async fn time_range(&self) -> Result<Option<TimeRange>> {
        let tables = self.tables.read();
        let mut stamps = tables.samples.values().map(|s| s.timestamp);
        let Some(first) = stamps.next() else {
            return Ok(None);
        };
        let (oldest, newest) = stamps.fold((first, first), |(lo, hi), ts| (lo.min(ts), hi.max(ts)));
        Ok(Some(TimeRange { oldest, newest }))
    }
}

#[async_trait]
impl SummaryStore for MemoryBackend {
    async fn insert_bucket(&self, bucket: SummaryBucket) -> Result<()> {
        self.tables.write().upsert(bucket);
        Ok(())
    }

    async fn buckets(&self) -> Result<Vec<SummaryBucket>> {
        Ok(self.tables.read().summaries.values().cloned().collect())
    }

    async fn bucket_count(&self) -> Result<u64> {
        Ok(self.tables.read().summaries.len() as u64)
    }
}

#[async_trait]
impl ArchiveStore for MemoryBackend {
    async fn archive_through(
        &self,
        through: DateTime<Utc>,
        mut aggregator: MinuteAggregator,
    ) -> Result<ArchiveOutcome> {
        let mut tables = self.tables.write();

        let open = ExpiryPredicate::through(through);
        for sample in tables.ordered_samples().iter().filter(|s| open.matches(s)) {
            aggregator.observe(sample);
        }
        let Some(max_sequence_id) = aggregator.max_sequence_id() else {
            return Ok(ArchiveOutcome {
                buckets: Vec::new(),
                rows_removed: 0,
            });
        };
        let summarized = aggregator.observed();
        let buckets = aggregator.finish();

        for bucket in &buckets {
            tables.upsert(bucket.clone());
        }
        let rows_removed = tables.remove_matching(open.pinned_to(max_sequence_id));
        if rows_removed != summarized {
            return Err(Error::ArchiveMismatch {
                summarized,
                removed: rows_removed,
            });
        }

        Ok(ArchiveOutcome {
            buckets,
            rows_removed,
        })
    }
}
