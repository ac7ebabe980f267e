//! Service configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Upstream dbSNP client settings.
    #[serde(default)]
    pub dbsnp: DbSnpConfig,

    /// Report cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Request history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Per-requester limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// NCBI dbSNP Variation Services client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSnpConfig {
    /// Base URL without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional NCBI API key (raises the upstream rate limit to 10 req/s).
    #[serde(default)]
    pub api_key: String,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,

    /// Total attempts per fetch, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upstream request pacing.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

/// Report cache lifetimes (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Age after which a cached report is stale and gets refreshed.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// How long a stale report is kept around as a fallback after its TTL.
    #[serde(default = "default_stale_retention")]
    pub stale_retention_secs: u64,

    /// Background sweep interval.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Request history journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Directory holding the JSONL journal.
    #[serde(default = "default_history_dir")]
    pub dir: String,

    /// Window used by the "recent history" view.
    #[serde(default = "default_history_window")]
    pub window_secs: u64,
}

/// Per-requester limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Max resolve requests per requester per hour (0 = unlimited).
    #[serde(default = "default_max_requests_per_hour")]
    pub max_requests_per_hour: u32,
}

impl DbSnpConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn stale_retention(&self) -> Duration {
        Duration::from_secs(self.stale_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl HistoryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://api.ncbi.nlm.nih.gov/variation/v0".into()
}
fn default_attempt_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_requests_per_second() -> u32 {
    3
}

fn default_ttl() -> u64 {
    86_400
}
fn default_stale_retention() -> u64 {
    86_400
}
fn default_sweep_interval() -> u64 {
    600
}

fn default_history_dir() -> String {
    "history".into()
}
fn default_history_window() -> u64 {
    86_400
}

fn default_max_requests_per_hour() -> u32 {
    50
}

impl Default for DbSnpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            attempt_timeout_secs: default_attempt_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            stale_retention_secs: default_stale_retention(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
            window_secs: default_history_window(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_hour: default_max_requests_per_hour(),
        }
    }
}
