//! Configuration for the synchronization core.
//!
//! This module provides `Config` (the knobs in every component) and
//! `Environment`, which selects the logging format used by
//! [`crate::tracing_init::init_tracing`].

use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Application environment, mirrors the deploy target: local development
/// gets human-readable logs, production gets structured JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Read `APP_ENV` (case-insensitive `"production"` selects
    /// [`Environment::Production`]; anything else, including unset,
    /// defaults to [`Environment::Development`]).
    pub fn from_env() -> Self {
        let raw = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        if raw.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Configuration shared by the cache, worker pool, batch processor, and
/// priority scheduler. All fields have defaults matching the reference
/// implementation.
#[derive(Clone, Debug)]
pub struct Config {
    /// Max operations per batch.
    pub batch_size: usize,
    /// Parallel batches in flight, and the worker count behind a batch
    /// processor's pool.
    pub max_concurrency: usize,
    /// Additional attempts after the first failure, at the batch level.
    pub retry_attempts: u32,
    /// Base delay between batch-level retries.
    pub retry_delay: Duration,
    /// Budget applied to each batch's context.
    pub per_operation_timeout: Duration,
    /// Whether the cached client wrapper is active.
    pub caching_enabled: bool,
    /// Max number of entries held by the cache before eviction kicks in.
    pub cache_size: usize,
    /// Default time-to-live applied to cache writes.
    pub cache_ttl: Duration,
    /// Worker pool queue capacity; `0` means "derive from `max_concurrency`".
    pub queue_capacity: usize,
    /// Max retries performed in-place by a worker pool worker.
    pub pool_max_retries: u32,
    /// `tracing_subscriber::EnvFilter` string used by `init_tracing`.
    pub log_filter: String,
    /// `"pretty"` or `"json"`, used by `init_tracing`.
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_concurrency: 5,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            per_operation_timeout: Duration::from_secs(30),
            caching_enabled: true,
            cache_size: 1000,
            cache_ttl: Duration::from_secs(15 * 60),
            queue_capacity: 0,
            pool_max_retries: 3,
            log_filter: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_per_operation_timeout(mut self, timeout: Duration) -> Self {
        self.per_operation_timeout = timeout;
        self
    }

    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Effective worker-pool queue capacity: the explicit override if set,
    /// else `2 * max_concurrency`.
    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            2 * self.max_concurrency.max(1)
        } else {
            self.queue_capacity
        }
    }

    /// Load configuration from `SYNC_*` environment variables, falling back
    /// to `Config::default()` for anything unset. `log_filter` additionally
    /// falls back to a filter derived from `environment` rather than a
    /// fixed string.
    pub fn from_env(environment: Environment) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut cfg = Self {
            log_filter: if environment.is_production() {
                "info".to_string()
            } else {
                "debug".to_string()
            },
            log_format: if environment.is_production() {
                "json".to_string()
            } else {
                "pretty".to_string()
            },
            ..defaults.clone()
        };

        if let Some(v) = env_var_usize("SYNC_BATCH_SIZE")? {
            cfg.batch_size = v;
        }
        if let Some(v) = env_var_usize("SYNC_MAX_CONCURRENCY")? {
            cfg.max_concurrency = v;
        }
        if let Some(v) = env_var_u32("SYNC_RETRY_ATTEMPTS")? {
            cfg.retry_attempts = v;
        }
        if let Some(v) = env_var_u64("SYNC_RETRY_DELAY_MS")? {
            cfg.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_var_u64("SYNC_PER_OPERATION_TIMEOUT_SECS")? {
            cfg.per_operation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_var_bool("SYNC_CACHING_ENABLED")? {
            cfg.caching_enabled = v;
        }
        if let Some(v) = env_var_usize("SYNC_CACHE_SIZE")? {
            cfg.cache_size = v;
        }
        if let Some(v) = env_var_u64("SYNC_CACHE_TTL_SECS")? {
            cfg.cache_ttl = Duration::from_secs(v);
        }
        if let Ok(v) = env::var("SYNC_LOG_FILTER") {
            cfg.log_filter = v;
        }
        if let Ok(v) = env::var("SYNC_LOG_FORMAT") {
            cfg.log_format = v;
        }

        Ok(cfg)
    }
}

fn env_var_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    parse_env(key)
}

fn env_var_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    parse_env(key)
}

fn env_var_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    parse_env(key)
}

fn env_var_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::ParseError {
                key: key.to_string(),
                details: format!("expected a boolean, got '{raw}'"),
            }),
        },
        Err(_) => Ok(None),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::ParseError {
                key: key.to_string(),
                details: format!("could not parse '{raw}'"),
            }),
        Err(_) => Ok(None),
    }
}
