use clap::Args;

#[derive(Args, Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log level, overrides -v and the configured level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Filter directives, e.g. "steadyhand_core=debug,duckdb=warn"
    #[arg(long, value_name = "FILTER", global = true)]
    pub log_filter: Option<String>,
}

impl LoggingConfig {
    /// Level from the command line, falling back to `configured`.
    pub fn get_effective_level(&self, configured: &str) -> String {
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        match self.verbose {
            0 => configured.to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}
