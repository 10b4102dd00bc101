//! Sample ingestion with an optional append-count compaction trigger.

use crate::compaction::Compactor;
use crate::error::Result;
use crate::sample::{NewSample, SamplePacket};
use crate::storage::ArchiveStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// When inline compaction runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTrigger {
    /// Only on explicit request or from a scheduler.
    Manual,
    /// After every `n` successful appends.
    EveryAppends(u64),
}

impl CompactionTrigger {
    /// `0` means manual.
    pub fn from_every_appends(n: u64) -> Self {
        if n == 0 {
            CompactionTrigger::Manual
        } else {
            CompactionTrigger::EveryAppends(n)
        }
    }
}

/// Appends samples to a store and runs compaction when the trigger fires.
///
/// A failed compaction never fails the append that triggered it; the
/// sample is already stored and the next trigger retries.
pub struct Ingestor {
    store: Arc<dyn ArchiveStore>,
    compactor: Arc<Compactor>,
    trigger: CompactionTrigger,
    appended: AtomicU64,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        compactor: Arc<Compactor>,
        trigger: CompactionTrigger,
    ) -> Self {
        Self {
            store,
            compactor,
            trigger,
            appended: AtomicU64::new(0),
        }
    }

    /// Samples appended through this ingestor since it was created.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Stores one sample and returns its sequence id.
    pub async fn append(&self, sample: NewSample) -> Result<i64> {
        let sequence_id = self.store.insert(sample).await?;
        let appended = self.appended.fetch_add(1, Ordering::Relaxed) + 1;

        if let CompactionTrigger::EveryAppends(n) = self.trigger {
            if n > 0 && appended % n == 0 {
                self.run_compaction(appended).await;
            }
        }
        Ok(sequence_id)
    }

    /// Normalizes and stores a device packet.
    pub async fn append_packet(&self, packet: SamplePacket) -> Result<i64> {
        let sample = NewSample::try_from(packet)?;
        self.append(sample).await
    }

    /// Stores samples in order, stopping at the first failure.
    pub async fn append_batch<I>(&self, samples: I) -> Result<Vec<i64>>
    where
        I: IntoIterator<Item = NewSample>,
    {
        let mut ids = Vec::new();
        for sample in samples {
            ids.push(self.append(sample).await?);
        }
        Ok(ids)
    }

    async fn run_compaction(&self, appended: u64) {
        match self.compactor.compact().await {
            Ok(result) => {
                debug!(
                    appended,
                    rows_removed = result.rows_removed,
                    "Inline compaction finished"
                );
            }
            Err(e) => {
                warn!("Inline compaction after {} appends failed: {}", appended, e);
            }
        }
    }
}
