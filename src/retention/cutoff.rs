use crate::error::{Error, Result};
use crate::retention::RetentionPolicy;
use crate::storage::SampleStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

/// Which bound produced a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CutoffTrigger {
    Age { max_age_secs: u64 },
    Count {
        population: u64,
        max_rows: u64,
        excess: u64,
    },
}

/// Samples with `timestamp <= instant` are eligible for archival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CutoffBoundary {
    pub instant: DateTime<Utc>,
    pub trigger: CutoffTrigger,
}

/// Computes a fresh boundary from the policy and current store state.
#[derive(Debug, Clone)]
pub struct CutoffSelector {
    policy: RetentionPolicy,
}

impl CutoffSelector {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Evaluates every configured bound and returns the later boundary, so
    /// that one archive pass satisfies both.
    ///
    /// `Ok(None)` means no compaction is due.
    pub async fn select<S>(&self, store: &S, now: DateTime<Utc>) -> Result<Option<CutoffBoundary>>
    where
        S: SampleStore + ?Sized,
    {
        let by_age = self.age_cutoff(store, now).await?;
        let by_count = self.count_cutoff(store).await?;

        Ok(match (by_age, by_count) {
            (Some(age), Some(count)) if age.instant > count.instant => Some(age),
            (Some(_), Some(count)) => Some(count),
            (age, count) => age.or(count),
        })
    }

    /// `now - max_age`, or `None` when nothing is that old yet.
    pub async fn age_cutoff<S>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Option<CutoffBoundary>>
    where
        S: SampleStore + ?Sized,
    {
        let Some(max_age) = self.policy.max_age() else {
            return Ok(None);
        };
        // Validated by RetentionPolicy::new.
        let age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let Some(instant) = now.checked_sub_signed(age) else {
            return Ok(None);
        };

        match store.timestamp_at_ordinal(1).await? {
            Some(oldest) if oldest <= instant => Ok(Some(CutoffBoundary {
                instant,
                trigger: CutoffTrigger::Age {
                    max_age_secs: max_age.as_secs(),
                },
            })),
            _ => {
                trace!(cutoff = %instant, "no sample older than max_age");
                Ok(None)
            }
        }
    }

    /// Timestamp of the `excess`-th oldest sample when the store holds more
    /// than `max_rows` samples.
    ///
    /// Archival is inclusive (`timestamp <= boundary`), so when several
    /// samples share the boundary timestamp all of them go, and the store
    /// may end up below `max_rows`. Retention is a soft bound: the count
    /// converges to at most `max_rows`, not exactly `max_rows`.
    pub async fn count_cutoff<S>(&self, store: &S) -> Result<Option<CutoffBoundary>>
    where
        S: SampleStore + ?Sized,
    {
        let Some(max_rows) = self.policy.max_rows() else {
            return Ok(None);
        };
        let population = store.count().await?;
        if population <= max_rows {
            return Ok(None);
        }

        let excess = population - max_rows;
        match store.timestamp_at_ordinal(excess).await? {
            Some(instant) => Ok(Some(CutoffBoundary {
                instant,
                trigger: CutoffTrigger::Count {
                    population,
                    max_rows,
                    excess,
                },
            })),
            None => Err(Error::BoundaryUnresolvable {
                ordinal: excess,
                population,
            }),
        }
    }
}
