//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Sample ingestion from files or stdin
//! - One-shot and scheduled compaction
//! - Inspecting raw and summary tables

pub mod commands;
pub mod handlers;

pub use handlers::{
    handle_compact, handle_ingest, handle_recent, handle_run, handle_status, handle_summaries,
};
