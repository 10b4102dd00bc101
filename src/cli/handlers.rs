use crate::{
    aggregation::SummaryBucket,
    compaction::{CompactionResult, CompactionScheduler, Compactor},
    config::Settings,
    error::Error,
    ingest::{CompactionTrigger, Ingestor},
    sample::{Sample, SamplePacket},
    storage::{SampleStore, StorageBackendType, SummaryStore},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Store plus compactor built from one set of settings.
pub struct Engine {
    pub store: Arc<StorageBackendType>,
    pub compactor: Arc<Compactor>,
}

impl Engine {
    pub fn open(settings: &Settings) -> Result<Self> {
        let policy = settings
            .retention
            .policy()
            .context("Invalid retention policy")?;
        let store = Arc::new(
            StorageBackendType::open(&settings.storage)
                .with_context(|| format!("Failed to open {} storage", settings.storage.engine))?,
        );
        let compactor = Arc::new(Compactor::new(store.clone(), policy));
        Ok(Self { store, compactor })
    }

    pub fn ingestor(&self, trigger: CompactionTrigger) -> Ingestor {
        Ingestor::new(self.store.clone(), self.compactor.clone(), trigger)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub engine: String,
    pub raw_samples: u64,
    pub summary_buckets: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub retention: String,
}

pub async fn handle_ingest(settings: &Settings, input: Option<&Path>) -> Result<IngestReport> {
    let engine = Engine::open(settings)?;
    let ingestor =
        engine.ingestor(CompactionTrigger::from_every_appends(settings.compaction.every_appends));

    let report = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            ingest_lines(&ingestor, BufReader::new(file)).await?
        }
        None => ingest_lines(&ingestor, BufReader::new(tokio::io::stdin())).await?,
    };

    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        "Ingest finished"
    );
    Ok(report)
}

/// Appends one packet per non-empty line. Malformed packets are skipped;
/// store failures abort.
pub async fn ingest_lines<R>(ingestor: &Ingestor, reader: R) -> Result<IngestReport>
where
    R: AsyncBufRead + Unpin,
{
    let mut report = IngestReport::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let appended = match serde_json::from_str::<SamplePacket>(line) {
            Ok(packet) => ingestor.append_packet(packet).await,
            Err(e) => Err(Error::from(e)),
        };
        match appended {
            Ok(_) => report.accepted += 1,
            Err(
                e @ (Error::InvalidTimestamp(_)
                | Error::InvalidSample(_)
                | Error::Serialization(_)),
            ) => {
                warn!("Skipping line {}: {}", line_no, e);
                report.rejected += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to append line {}", line_no));
            }
        }
    }
    Ok(report)
}

pub async fn handle_compact(settings: &Settings) -> Result<CompactionResult> {
    let engine = Engine::open(settings)?;
    let result = engine
        .compactor
        .compact()
        .await
        .context("Compaction failed")?;
    Ok(result)
}

/// Runs the compaction scheduler until `shutdown` resolves.
pub async fn handle_run<F>(settings: &Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let engine = Engine::open(settings)?;
    let interval = settings.compaction.interval()?;
    info!(
        "Compacting every {:?} with retention {}",
        interval,
        engine.compactor.policy()
    );

    let handle = CompactionScheduler::new(engine.compactor.clone(), interval).start();
    shutdown.await;
    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

pub async fn handle_status(settings: &Settings) -> Result<StatusReport> {
    let engine = Engine::open(settings)?;
    let raw_samples = engine.store.count().await?;
    let summary_buckets = engine.store.bucket_count().await?;
    let range = engine.store.time_range().await?;

    Ok(StatusReport {
        engine: settings.storage.engine.clone(),
        raw_samples,
        summary_buckets,
        oldest: range.map(|r| r.oldest),
        newest: range.map(|r| r.newest),
        retention: engine.compactor.policy().to_string(),
    })
}

pub async fn handle_recent(settings: &Settings, limit: usize) -> Result<Vec<Sample>> {
    let engine = Engine::open(settings)?;
    Ok(engine.store.recent(limit).await?)
}

pub async fn handle_summaries(settings: &Settings) -> Result<Vec<SummaryBucket>> {
    let engine = Engine::open(settings)?;
    Ok(engine.store.buckets().await?)
}
