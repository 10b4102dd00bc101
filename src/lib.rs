//! Steadyhand keeps a raw inertial/temperature sample store within a
//! retention policy, folding expired samples into per-minute summaries.

pub mod aggregation;
pub mod cli;
pub mod compaction;
pub mod config;
pub mod error;
pub mod ingest;
pub mod retention;
pub mod sample;
pub mod storage;

// Re-export commonly used types
pub use aggregation::{MinuteAggregator, SummaryBucket};
pub use compaction::{CompactionResult, CompactionScheduler, Compactor};
pub use error::{Error, Result};
pub use ingest::{CompactionTrigger, Ingestor};
pub use retention::{CutoffBoundary, CutoffSelector, RetentionPolicy};
pub use sample::{NewSample, Sample, SamplePacket};
pub use storage::{ArchiveStore, SampleStore, StorageBackendType, SummaryStore};
