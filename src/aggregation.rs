//! Minute-bucket downsampling of raw samples.
//!
//! Expired samples are folded into one [`SummaryBucket`] per distinct minute.
//! Each bucket keeps its `sample_count` so that fragments produced by
//! different compaction runs for the same minute can be merged into a
//! count-weighted running mean.

use crate::sample::Sample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-minute aggregate of archived samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryBucket {
    /// Start of the minute (seconds and below are zero).
    pub minute_start: DateTime<Utc>,
    /// Mean Euclidean norm of the acceleration vectors.
    pub avg_accel_magnitude: f64,
    pub avg_temperature: f64,
    /// Number of raw samples folded into this bucket.
    pub sample_count: u64,
}

impl SummaryBucket {
    /// Combines two buckets for the same minute into a count-weighted mean.
    pub fn merge(&self, other: &SummaryBucket) -> SummaryBucket {
        debug_assert_eq!(self.minute_start, other.minute_start);

        let total = self.sample_count + other.sample_count;
        if total == 0 {
            return self.clone();
        }
        let (a, b) = (self.sample_count as f64, other.sample_count as f64);
        let weighted = |x: f64, y: f64| (x * a + y * b) / (a + b);

        SummaryBucket {
            minute_start: self.minute_start,
            avg_accel_magnitude: weighted(self.avg_accel_magnitude, other.avg_accel_magnitude),
            avg_temperature: weighted(self.avg_temperature, other.avg_temperature),
            sample_count: total,
        }
    }
}

#[derive(Debug, Default)]
struct MinuteValues {
    magnitudes: Vec<f64>,
    temperatures: Vec<f64>,
}

/// Streaming minute aggregator fed by a store during the archive unit.
///
/// Values are summed in sorted order when the bucket is emitted, so the
/// result does not depend on the order in which samples were observed.
#[derive(Debug, Default)]
pub struct MinuteAggregator {
    minutes: BTreeMap<DateTime<Utc>, MinuteValues>,
    observed: u64,
    max_sequence_id: Option<i64>,
}

impl MinuteAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sample: &Sample) {
        let values = self.minutes.entry(sample.minute_start()).or_default();
        values.magnitudes.push(sample.accel_magnitude());
        values.temperatures.push(sample.temperature);

        self.observed += 1;
        self.max_sequence_id = Some(
            self.max_sequence_id
                .map_or(sample.sequence_id, |max| max.max(sample.sequence_id)),
        );
    }

    /// Number of samples observed so far.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Highest sequence id observed, used to pin the delete predicate to the
    /// exact set that was read.
    pub fn max_sequence_id(&self) -> Option<i64> {
        self.max_sequence_id
    }

    pub fn is_empty(&self) -> bool {
        self.observed == 0
    }

    /// Emits one bucket per minute, ordered by `minute_start` ascending.
    pub fn finish(self) -> Vec<SummaryBucket> {
        self.minutes
            .into_iter()
            .map(|(minute_start, values)| {
                let count = values.magnitudes.len();
                SummaryBucket {
                    minute_start,
                    avg_accel_magnitude: ordered_mean(values.magnitudes),
                    avg_temperature: ordered_mean(values.temperatures),
                    sample_count: count as u64,
                }
            })
            .collect()
    }
}

fn ordered_mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let sum: f64 = values.iter().sum();
    sum / values.len() as f64
}

/// Convenience for callers holding a full slice of samples.
pub fn summarize(samples: &[Sample]) -> Vec<SummaryBucket> {
    let mut aggregator = MinuteAggregator::new();
    for sample in samples {
        aggregator.observe(sample);
    }
    aggregator.finish()
}
