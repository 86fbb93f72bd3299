use clap::Parser;
use std::path::PathBuf;

/// What a terminal item failure does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ErrorMode {
    /// First terminal failure aborts the whole batch
    Raise,
    /// Failures are recorded in place, other items are unaffected
    Ignore,
}

/// Engine configuration. Defaults suit a polite batch workload against a
/// shared provider.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum provider calls in flight at once
    pub async_capacity: usize,
    /// Admissions per rolling minute, 0 = unlimited
    pub max_requests_per_minute: u32,
    /// Durable cache location, None disables caching
    pub cache_dir: Option<PathBuf>,
    pub error_mode: ErrorMode,
    /// Per-request timeout in seconds, 0 disables
    pub timeout_secs: u64,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    /// First backoff delay in seconds, doubled per retry
    pub backoff_base_secs: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            async_capacity: 3,
            max_requests_per_minute: 20,
            cache_dir: None,
            error_mode: ErrorMode::Raise,
            timeout_secs: 20,
            max_retries: 2,
            backoff_base_secs: 2.0,
        }
    }
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "lm-dispatch")]
#[command(about = "Batch dispatcher for language model requests")]
pub struct Args {
    // File with one prompt per line
    #[arg(short, long)]
    pub prompts: PathBuf,

    // Completion endpoint to POST canonical requests to
    #[arg(short, long)]
    pub endpoint: String,

    // Target model identifier
    #[arg(short, long)]
    pub model: String,

    // Bearer token sent with every request
    #[arg(long)]
    pub api_key: Option<String>,

    // Max provider calls in flight at once
    #[arg(long, default_value_t = 3)]
    pub async_capacity: usize,

    // Admissions per rolling minute (0 = unlimited)
    #[arg(long, default_value_t = 20)]
    pub max_requests_per_minute: u32,

    // Durable response cache directory (omit to disable caching)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "raise")]
    pub error_mode: ErrorMode,

    // Per-request timeout in seconds (0 disables)
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,

    // Retries per request for transient failures
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    // First backoff delay in seconds, doubled per retry
    #[arg(long, default_value_t = 2.0)]
    pub backoff_base: f64,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub max_tokens: Option<u32>,
}

impl Args {
    pub fn to_config(&self) -> DispatchConfig {
        DispatchConfig {
            async_capacity: self.async_capacity,
            max_requests_per_minute: self.max_requests_per_minute,
            cache_dir: self.cache_dir.clone(),
            error_mode: self.error_mode,
            timeout_secs: self.timeout,
            max_retries: self.max_retries,
            backoff_base_secs: self.backoff_base,
        }
    }
}
