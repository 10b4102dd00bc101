//! Compaction: select a cutoff, summarize expired samples, delete them.
//!
//! The summarize and delete steps run inside the store's archive unit
//! ([`ArchiveStore::archive_through`]); a run either commits both or
//! neither. Runs on one [`Compactor`] are serialized.

use crate::aggregation::MinuteAggregator;
use crate::error::{Error, Result};
use crate::retention::{CutoffBoundary, CutoffSelector, RetentionPolicy};
use crate::storage::ArchiveStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Counts reported by one compaction run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionResult {
    /// The boundary that was applied, `None` for a no-op run.
    pub cutoff: Option<CutoffBoundary>,
    pub buckets_written: usize,
    pub rows_removed: u64,
    /// Sum of `sample_count` over the buckets written by this run.
    pub samples_summarized: u64,
}

impl CompactionResult {
    pub fn noop() -> Self {
        Self {
            cutoff: None,
            buckets_written: 0,
            rows_removed: 0,
            samples_summarized: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.cutoff.is_none()
    }
}

/// Orchestrates retention for one store.
pub struct Compactor {
    store: Arc<dyn ArchiveStore>,
    selector: CutoffSelector,
    run_lock: Mutex<()>,
}

impl Compactor {
    pub fn new(store: Arc<dyn ArchiveStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            selector: CutoffSelector::new(policy),
            run_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        self.selector.policy()
    }

    /// Runs one compaction against the current wall clock.
    pub async fn compact(&self) -> Result<CompactionResult> {
        self.compact_at(Utc::now()).await
    }

    /// Runs one compaction treating `now` as the current instant.
    pub async fn compact_at(&self, now: DateTime<Utc>) -> Result<CompactionResult> {
        let _running = self.run_lock.lock().await;

        let cutoff = match self.selector.select(self.store.as_ref(), now).await {
            Ok(Some(cutoff)) => cutoff,
            Ok(None) => {
                debug!(policy = %self.selector.policy(), "no compaction due");
                return Ok(CompactionResult::noop());
            }
            Err(err @ Error::BoundaryUnresolvable { .. }) => {
                warn!("Deferring compaction to the next run: {}", err);
                return Ok(CompactionResult::noop());
            }
            Err(err) => return Err(err),
        };

        let outcome = match self
            .store
            .archive_through(cutoff.instant, MinuteAggregator::new())
            .await
        {
            Ok(outcome) => outcome,
            Err(source) => {
                let population = self.store.count().await.unwrap_or(0);
                return Err(Error::Compaction {
                    boundary: cutoff.instant,
                    population,
                    source: Box::new(source),
                });
            }
        };

        let result = CompactionResult {
            cutoff: Some(cutoff),
            buckets_written: outcome.buckets.len(),
            rows_removed: outcome.rows_removed,
            samples_summarized: outcome.samples_summarized(),
        };
        info!(
            cutoff = %cutoff.instant,
            trigger = ?cutoff.trigger,
            buckets = result.buckets_written,
            rows_removed = result.rows_removed,
            "Compaction completed"
        );
        Ok(result)
    }
}

/// Background task that compacts on a fixed wall-clock interval.
pub struct CompactionScheduler {
    compactor: Arc<Compactor>,
    interval: Duration,
}

/// Handle to a running [`CompactionScheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops the scheduler after any in-flight run finishes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Compaction scheduler task failed: {}", e);
        }
    }
}

impl CompactionScheduler {
    pub fn new(compactor: Arc<Compactor>, interval: Duration) -> Self {
        Self {
            compactor,
            interval,
        }
    }

    /// Start the background compaction task. The first run happens
    /// immediately.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!("Starting compaction scheduler with interval: {:?}", self.interval);

            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stop.changed() => break,
                }

                match self.compactor.compact().await {
                    Ok(result) if result.is_noop() => {}
                    Ok(result) => {
                        debug!(rows_removed = result.rows_removed, "Scheduled compaction finished");
                    }
                    Err(e) if e.is_transient() => {
                        warn!("Scheduled compaction failed, retrying next interval: {}", e);
                    }
                    Err(e) => {
                        error!("Scheduled compaction failed: {}", e);
                    }
                }
            }
            info!("Compaction scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}
