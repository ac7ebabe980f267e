//! Configuration loader: merges .env, config.toml and environment variables.

use common::{Error, ServiceConfig};
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_non_negative_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

pub(crate) fn validate_config(config: &ServiceConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    let base_url = config.dbsnp.base_url.trim();
    if base_url.is_empty() {
        issues.push("dbsnp.base_url must not be empty".into());
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        issues.push("dbsnp.base_url must be an http(s) URL".into());
    }
    if config.dbsnp.attempt_timeout_secs == 0 {
        issues.push("dbsnp.attempt_timeout_secs must be > 0".into());
    }
    if config.dbsnp.max_attempts == 0 {
        issues.push("dbsnp.max_attempts must be > 0".into());
    }

    if config.cache.ttl_secs == 0 {
        issues.push("cache.ttl_secs must be > 0".into());
    }
    if config.cache.sweep_interval_secs == 0 {
        issues.push("cache.sweep_interval_secs must be > 0".into());
    }

    if config.history.dir.trim().is_empty() {
        issues.push("history.dir must not be empty".into());
    }
    if config.history.window_secs == 0 {
        issues.push("history.window_secs must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides on top of `config`. `lookup` is `std::env::var`
/// outside of tests.
pub(crate) fn apply_env_overrides(
    config: &mut ServiceConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    if let Some(url) = lookup("DBSNP_BASE_URL") {
        config.dbsnp.base_url = url.trim().to_string();
    }
    if let Some(key) = lookup("NCBI_API_KEY") {
        config.dbsnp.api_key = key;
    }
    if let Some(raw) = lookup("NCBI_API_TIMEOUT") {
        config.dbsnp.attempt_timeout_secs = parse_positive_u64(&raw, "NCBI_API_TIMEOUT")?;
    }
    if let Some(raw) = lookup("DBSNP_MAX_ATTEMPTS") {
        let attempts = parse_non_negative_u32(&raw, "DBSNP_MAX_ATTEMPTS")?;
        if attempts == 0 {
            return Err(Error::Config("DBSNP_MAX_ATTEMPTS must be an integer > 0".into()));
        }
        config.dbsnp.max_attempts = attempts;
    }
    if let Some(raw) = lookup("DBSNP_BACKOFF_BASE_MS") {
        config.dbsnp.backoff_base_ms = raw.trim().parse::<u64>().map_err(|_| {
            Error::Config("DBSNP_BACKOFF_BASE_MS must be an integer >= 0".into())
        })?;
    }
    if let Some(raw) = lookup("CACHE_TTL") {
        config.cache.ttl_secs = parse_positive_u64(&raw, "CACHE_TTL")?;
    }
    if let Some(raw) = lookup("MAX_REQUESTS_PER_HOUR") {
        config.limits.max_requests_per_hour =
            parse_non_negative_u32(&raw, "MAX_REQUESTS_PER_HOUR")?;
    }
    if let Some(dir) = lookup("HISTORY_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            config.history.dir = trimmed.to_string();
        }
    }
    Ok(())
}

/// Load service configuration from environment and optional config file.
pub fn load_config() -> Result<ServiceConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = ServiceConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}
