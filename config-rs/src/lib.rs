//! config-rs/lib.rs
//! Service configuration loaded from `.env`, an optional TOML file and the
//! process environment, in increasing precedence.

mod repo_mapping;

pub use repo_mapping::{RepoMapping, DEFAULT_KEY};

use config::{Config, Environment, File};
use error_handling_rs::{LoggingConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_FILE_ENV: &str = "TERRAFIX_CONFIG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Token bucket parameters for one class of outbound calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub refill_per_second: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    // Failure source
    pub vanta_api_token: String,
    #[serde(default = "defaults::vanta_base_url")]
    pub vanta_base_url: String,

    // Hosting
    pub github_token: String,
    #[serde(default = "defaults::github_api_url")]
    pub github_api_url: String,
    pub github_repo_mapping: RepoMapping,
    #[serde(default = "defaults::terraform_path")]
    pub terraform_path: String,
    #[serde(default = "defaults::terraform_binary")]
    pub terraform_binary: String,

    // Fix generator
    pub fix_generator_url: String,
    #[serde(default)]
    pub fix_generator_token: Option<String>,

    // Claim store
    #[serde(default = "defaults::redis_url")]
    pub redis_url: String,
    #[serde(default = "defaults::state_key_prefix")]
    pub state_key_prefix: String,
    #[serde(default = "defaults::state_retention_days")]
    pub state_retention_days: u64,

    // Polling and workers
    #[serde(default = "defaults::poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "defaults::max_concurrent_workers")]
    pub max_concurrent_workers: usize,
    #[serde(default = "defaults::work_queue_capacity")]
    pub work_queue_capacity: usize,
    #[serde(default = "defaults::cleanup_every_cycles")]
    pub cleanup_every_cycles: u64,
    #[serde(default = "defaults::initial_lookback_seconds")]
    pub initial_lookback_seconds: u64,
    #[serde(default = "defaults::shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    #[serde(default = "defaults::degraded_after_store_failures")]
    pub degraded_after_store_failures: u32,

    // Rate limits
    #[serde(default = "defaults::management_rate_per_minute")]
    pub management_rate_per_minute: f64,
    #[serde(default = "defaults::management_burst")]
    pub management_burst: u32,
    #[serde(default = "defaults::read_rate_per_minute")]
    pub read_rate_per_minute: f64,
    #[serde(default = "defaults::read_burst")]
    pub read_burst: u32,
    #[serde(default = "defaults::rate_limit_timeout_seconds")]
    pub rate_limit_timeout_seconds: u64,

    // Retry
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "defaults::max_backoff_ms")]
    pub max_backoff_ms: u64,

    // HTTP and observability
    #[serde(default = "defaults::http_host")]
    pub http_host: String,
    #[serde(default = "defaults::http_port")]
    pub http_port: u16,
    #[serde(default)]
    pub metrics_addr: Option<String>,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default = "defaults::log_format")]
    pub log_format: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

mod defaults {
    pub fn vanta_base_url() -> String {
        "https://api.vanta.com".into()
    }
    pub fn github_api_url() -> String {
        "https://api.github.com".into()
    }
    pub fn terraform_path() -> String {
        ".".into()
    }
    pub fn terraform_binary() -> String {
        "terraform".into()
    }
    pub fn redis_url() -> String {
        "redis://localhost:6379".into()
    }
    pub fn state_key_prefix() -> String {
        "terrafix:".into()
    }
    pub fn state_retention_days() -> u64 {
        7
    }
    pub fn poll_interval_seconds() -> u64 {
        300
    }
    pub fn max_concurrent_workers() -> usize {
        3
    }
    pub fn work_queue_capacity() -> usize {
        32
    }
    pub fn cleanup_every_cycles() -> u64 {
        10
    }
    pub fn initial_lookback_seconds() -> u64 {
        3600
    }
    pub fn shutdown_grace_seconds() -> u64 {
        30
    }
    pub fn degraded_after_store_failures() -> u32 {
        3
    }
    pub fn management_rate_per_minute() -> f64 {
        50.0
    }
    pub fn management_burst() -> u32 {
        10
    }
    pub fn read_rate_per_minute() -> f64 {
        20.0
    }
    pub fn read_burst() -> u32 {
        5
    }
    pub fn rate_limit_timeout_seconds() -> u64 {
        120
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn initial_backoff_ms() -> u64 {
        2000
    }
    pub fn max_backoff_ms() -> u64 {
        60_000
    }
    pub fn http_host() -> String {
        "0.0.0.0".into()
    }
    pub fn http_port() -> u16 {
        8080
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn log_format() -> String {
        "json".into()
    }
}

impl ServiceConfig {
    /// Loads `.env`, then `$TERRAFIX_CONFIG_FILE` if set, then the process
    /// environment, and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        if dotenv::dotenv().is_ok() {
            tracing::debug!("Loaded variables from .env");
        }

        let mut builder = Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(File::with_name(&path).required(true));
        }
        let cfg = builder
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        let config: ServiceConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from explicit key/value pairs (lowercase
    /// snake_case keys), bypassing the process environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut builder = Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(key.as_ref().to_ascii_lowercase(), value.into())?;
        }
        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vanta_api_token.trim().is_empty() {
            return Err(invalid("VANTA_API_TOKEN", "must not be empty"));
        }
        if self.github_token.trim().is_empty() {
            return Err(invalid("GITHUB_TOKEN", "must not be empty"));
        }
        if self.fix_generator_url.trim().is_empty() {
            return Err(invalid("FIX_GENERATOR_URL", "must not be empty"));
        }
        if self.github_repo_mapping.is_empty() {
            return Err(invalid("GITHUB_REPO_MAPPING", "must contain at least one entry"));
        }
        let bad = self.github_repo_mapping.invalid_entries();
        if !bad.is_empty() {
            return Err(invalid(
                "GITHUB_REPO_MAPPING",
                format!("entries must map to owner/repo: {}", bad.join(", ")),
            ));
        }
        if self.poll_interval_seconds < 1 {
            return Err(invalid("POLL_INTERVAL_SECONDS", "must be at least 1"));
        }
        if !(1..=10).contains(&self.max_concurrent_workers) {
            return Err(invalid("MAX_CONCURRENT_WORKERS", "must be between 1 and 10"));
        }
        if self.work_queue_capacity < 1 {
            return Err(invalid("WORK_QUEUE_CAPACITY", "must be at least 1"));
        }
        if self.state_retention_days < 1 {
            return Err(invalid("STATE_RETENTION_DAYS", "must be at least 1"));
        }
        if self.cleanup_every_cycles < 1 {
            return Err(invalid("CLEANUP_EVERY_CYCLES", "must be at least 1"));
        }
        if self.degraded_after_store_failures < 1 {
            return Err(invalid("DEGRADED_AFTER_STORE_FAILURES", "must be at least 1"));
        }
        for (field, rate, burst) in [
            ("MANAGEMENT_RATE_PER_MINUTE", self.management_rate_per_minute, self.management_burst),
            ("READ_RATE_PER_MINUTE", self.read_rate_per_minute, self.read_burst),
        ] {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(invalid(field, "must be a positive number"));
            }
            if burst < 1 {
                return Err(invalid(field, "burst must be at least 1"));
            }
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(invalid("INITIAL_BACKOFF_MS", "must not exceed MAX_BACKOFF_MS"));
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(invalid("LOG_FORMAT", "must be json or pretty"));
        }
        self.http_addr()?;
        self.metrics_socket_addr()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.state_retention_days * 86_400)
    }

    pub fn initial_lookback(&self) -> Duration {
        Duration::from_secs(self.initial_lookback_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn rate_limit_timeout(&self) -> Duration {
        Duration::from_secs(self.rate_limit_timeout_seconds)
    }

    pub fn management_rate_limit(&self) -> RateLimitSettings {
        RateLimitSettings {
            capacity: self.management_burst,
            refill_per_second: self.management_rate_per_minute / 60.0,
        }
    }

    pub fn read_rate_limit(&self) -> RateLimitSettings {
        RateLimitSettings {
            capacity: self.read_burst,
            refill_per_second: self.read_rate_per_minute / 60.0,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            service_name: "terrafix".to_string(),
            json_format: self.log_format == "json",
            log_dir: self.log_file.clone(),
        }
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        bind_address(&self.http_host, self.http_port)
    }

    pub fn metrics_socket_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        match self.metrics_addr.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_socket_addr(raw)
                .map(Some)
                .ok_or_else(|| invalid("METRICS_ADDR", format!("not a socket address: {}", raw))),
        }
    }
}

/// Socket address from a host and port. The host may be an IP literal or
/// `localhost`.
pub fn bind_address(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let host = host.trim();
    let ip: IpAddr = if host.eq_ignore_ascii_case("localhost") {
        IpAddr::from([127, 0, 0, 1])
    } else {
        host.parse()
            .map_err(|_| invalid("HTTP_HOST", format!("not an IP address: {}", host)))?
    };
    Ok(SocketAddr::new(ip, port))
}

// Accepts `host:port` and `http://host:port`.
fn parse_socket_addr(raw: &str) -> Option<SocketAddr> {
    let stripped = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"))
        .unwrap_or(raw);
    stripped.trim_end_matches('/').parse().ok()
}
