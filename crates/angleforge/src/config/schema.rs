use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub layouts: LayoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.angleforge/data/angleforge.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_result_timeout")]
    pub result_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_status_timeout() -> u64 {
    15
}

fn default_submit_timeout() -> u64 {
    30
}

fn default_result_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
    /// Age after which a processing job is reported as stuck.
    #[serde(default = "default_stuck_after")]
    pub stuck_after_secs: u64,
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_sweep_concurrency() -> usize {
    num_cpus::get()
}

fn default_stuck_after() -> u64 {
    3600
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            sweep_concurrency: default_sweep_concurrency(),
            stuck_after_secs: default_stuck_after(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Credits charged per completed job, by job type.
    #[serde(default)]
    pub credits_by_job_type: BTreeMap<String, u32>,
    #[serde(default = "default_credits")]
    pub default_credits: u32,
    /// Credits included in each monthly period before usage counts as overage.
    #[serde(default)]
    pub included_credits_per_period: Option<u64>,
}

fn default_credits() -> u32 {
    1
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            credits_by_job_type: BTreeMap::new(),
            default_credits: default_credits(),
            included_credits_per_period: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutsConfig {
    /// Directory of `*.html` layouts; each file's stem is its id.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Inline layouts by id.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default = "default_layout")]
    pub default_layout: String,
    /// Run slot values through the HTML sanitizer before injection.
    #[serde(default = "default_true")]
    pub sanitize: bool,
}

pub(crate) fn default_layout() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LayoutsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            templates: BTreeMap::new(),
            default_layout: default_layout(),
            sanitize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}
