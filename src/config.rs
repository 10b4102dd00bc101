//! Configuration management for steadyhand.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/steadyhand/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `STEADYHAND_`, `__` between
//!    section and key, e.g. `STEADYHAND_RETENTION__MAX_ROWS`)
//! 5. Command-line arguments
//!
//! Configuration options are loaded in order of precedence, with later sources
//! overriding earlier ones.

use crate::error::{Error, Result};
use crate::retention::RetentionPolicy;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const SYSTEM_CONFIG: &str = "/etc/steadyhand/config.toml";

/// Command-line overrides shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage engine type (duckdb, memory)
    #[arg(long, global = true)]
    pub engine: Option<String>,

    /// DuckDB database file
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<String>,

    /// Archive raw samples older than this many seconds
    #[arg(long, global = true)]
    pub max_age_secs: Option<u64>,

    /// Keep at most this many raw samples
    #[arg(long, global = true)]
    pub max_rows: Option<u64>,

    /// Compact inline after this many appends (0 disables)
    #[arg(long, global = true)]
    pub compact_every: Option<u64>,

    /// Seconds between scheduled compactions
    #[arg(long, global = true)]
    pub compact_interval_secs: Option<u64>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub compaction: CompactionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Storage engine type
    pub engine: String,
    /// Database file for the duckdb engine
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    #[serde(default)]
    pub max_rows: Option<u64>,
}

impl RetentionSettings {
    /// Builds and validates the retention policy.
    pub fn policy(&self) -> Result<RetentionPolicy> {
        RetentionPolicy::new(self.max_age_secs.map(Duration::from_secs), self.max_rows)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Appends between inline compactions; 0 disables the append trigger.
    #[serde(default = "default_every_appends")]
    pub every_appends: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            every_appends: default_every_appends(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl CompactionSettings {
    pub fn interval(&self) -> Result<Duration> {
        if self.interval_secs == 0 {
            return Err(Error::Config(
                "compaction.interval_secs must be positive".to_string(),
            ));
        }
        Ok(Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Filter directives, e.g. `steadyhand_core=debug`
    #[serde(default)]
    pub filter: Option<String>,
    /// Directory for a daily-rotated log file in addition to stderr
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            directory: None,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load(args: &ConfigArgs) -> Result<Self> {
        let system = config::File::with_name(SYSTEM_CONFIG).required(false);
        let env = config::Environment::with_prefix("STEADYHAND")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::load_layers(Some(system), args, Some(env))
    }

    /// Embedded defaults, then the host sources that are given, then the
    /// user file and command-line flags.
    fn load_layers(
        system: Option<config::File<config::FileSourceFile, config::FileFormat>>,
        args: &ConfigArgs,
        env: Option<config::Environment>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));
        if let Some(system) = system {
            builder = builder.add_source(system);
        }

        // Load user config if specified
        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.apply_overrides(args);
        Ok(settings)
    }

    /// Command-line flags win over every file and environment source.
    pub fn apply_overrides(&mut self, args: &ConfigArgs) {
        if let Some(engine) = &args.engine {
            self.storage.engine = engine.clone();
        }
        if let Some(path) = &args.database {
            self.storage.path = path.clone();
        }
        if let Some(secs) = args.max_age_secs {
            self.retention.max_age_secs = Some(secs);
        }
        if let Some(rows) = args.max_rows {
            self.retention.max_rows = Some(rows);
        }
        if let Some(every) = args.compact_every {
            self.compaction.every_appends = every;
        }
        if let Some(secs) = args.compact_interval_secs {
            self.compaction.interval_secs = secs;
        }
    }
}

fn default_every_appends() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}
