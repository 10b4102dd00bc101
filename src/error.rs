//! Error types for the steadyhand retention engine.

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for steadyhand operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for steadyhand operations.
///
/// There is no "no cutoff applicable" variant: a compliant store is the
/// steady state and is reported as `None` / a no-op compaction result.
#[derive(Debug)]
pub enum Error {
    /// The durable backend could not serve the request.
    StoreUnavailable {
        operation: &'static str,
        message: String,
    },
    /// A count-based cutoff was requested but the ordinal scan found no row
    /// at the computed position (typically a concurrent deletion).
    BoundaryUnresolvable { ordinal: u64, population: u64 },
    /// The archive unit summarized and removed different row counts; the
    /// unit was rolled back.
    ArchiveMismatch { summarized: u64, removed: u64 },
    /// A compaction run failed after a boundary was chosen.
    Compaction {
        boundary: DateTime<Utc>,
        population: u64,
        source: Box<Error>,
    },
    /// A caller-supplied timestamp could not be normalized.
    InvalidTimestamp(String),
    /// A sample carried a non-finite measurement.
    InvalidSample(String),
    /// Configuration errors
    Config(String),
    /// A query the backend could run but whose shape or values did not fit
    /// (bad column, type conversion, parameter count). Retrying will not help.
    Query {
        operation: &'static str,
        message: String,
    },
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
}

impl Error {
    /// Wraps a backend failure with the operation that was attempted.
    pub fn store(operation: &'static str, err: impl fmt::Display) -> Self {
        Error::StoreUnavailable {
            operation,
            message: err.to_string(),
        }
    }

    /// Classifies a DuckDB failure. Engine-level failures (I/O, locks,
    /// aborted transactions) may clear up; row and parameter mapping errors
    /// will not.
    pub fn duckdb(operation: &'static str, err: duckdb::Error) -> Self {
        match err {
            duckdb::Error::DuckDBFailure(..) | duckdb::Error::InvalidPath(_) => {
                Error::store(operation, err)
            }
            other => Error::Query {
                operation,
                message: other.to_string(),
            },
        }
    }

    /// Whether retrying on the next scheduled run may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreUnavailable { .. } | Error::BoundaryUnresolvable { .. } => true,
            Error::Compaction { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StoreUnavailable { operation, message } => {
                write!(f, "Store unavailable during {}: {}", operation, message)
            }
            Error::BoundaryUnresolvable {
                ordinal,
                population,
            } => write!(
                f,
                "Cutoff boundary unresolvable: no sample at ordinal {} of {}",
                ordinal, population
            ),
            Error::ArchiveMismatch {
                summarized,
                removed,
            } => write!(
                f,
                "Archive mismatch: summarized {} samples but removed {}",
                summarized, removed
            ),
            Error::Compaction {
                boundary,
                population,
                source,
            } => write!(
                f,
                "Compaction through {} failed with {} raw samples present: {}",
                boundary.to_rfc3339(),
                population,
                source
            ),
            Error::Query { operation, message } => {
                write!(f, "Query failed during {}: {}", operation, message)
            }
            Error::InvalidTimestamp(msg) => write!(f, "Invalid timestamp: {}", msg),
            Error::InvalidSample(msg) => write!(f, "Invalid sample: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Compaction { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Error::duckdb("duckdb", err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
