use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Control API port (default: 8080)
    #[serde(default)]
    pub api_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Maximum concurrent health probes across the whole registry
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    /// Scheduler tick resolution for probe dispatch (ms)
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
    /// Load-balancing strategy: round_robin, least_connections, random
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Total route attempts per request, including the first
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Base delay for exponential backoff between attempts (ms)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay (ms)
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Freshness window for cached fallback responses (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub fallback_cache_ttl_secs: u64,
}

fn default_probe_concurrency() -> usize {
    5
}

fn default_scheduler_tick_ms() -> u64 {
    250
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: default_probe_concurrency(),
            scheduler_tick_ms: default_scheduler_tick_ms(),
            strategy: default_strategy(),
            retry_budget: default_retry_budget(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            fallback_cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Time-to-live for a pending approval record (seconds)
    #[serde(default = "default_approval_ttl_secs")]
    pub ttl_secs: u64,
    /// Confidence above which actions execute without review
    #[serde(default = "default_auto_execute_threshold")]
    pub auto_execute_threshold: f64,
    /// Confidence below which actions require full review
    #[serde(default = "default_full_review_threshold")]
    pub full_review_threshold: f64,
}

fn default_approval_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_auto_execute_threshold() -> f64 {
    0.85
}

fn default_full_review_threshold() -> f64 {
    0.60
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_approval_ttl_secs(),
            auto_execute_threshold: default_auto_execute_threshold(),
            full_review_threshold: default_full_review_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional log file directory (stdout only when unset)
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SWITCHBOARD_ENV")
                        .unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SWITCHBOARD_MESH__RETRY_BUDGET, etc.)
            .add_source(
                Environment::with_prefix("SWITCHBOARD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.mesh.probe_concurrency == 0 {
            errors.push("mesh.probe_concurrency must be at least 1".to_string());
        }

        if self.mesh.retry_budget == 0 {
            errors.push("mesh.retry_budget must be at least 1".to_string());
        }

        if !["round_robin", "least_connections", "random"]
            .contains(&self.mesh.strategy.as_str())
        {
            errors.push(format!("unknown mesh.strategy: {}", self.mesh.strategy));
        }

        if self.approval.ttl_secs == 0 {
            errors.push("approval.ttl_secs must be positive".to_string());
        }

        if self.approval.full_review_threshold > self.approval.auto_execute_threshold {
            errors.push(
                "approval.full_review_threshold must not exceed auto_execute_threshold"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
