//! Configuration module for the strata engine.
//!
//! Loads configuration from environment variables, with working defaults
//! for every setting so embedding applications can also construct the
//! config programmatically.

use std::env;
use std::time::Duration;

use crate::cache::{MemoryConfig, TtlProfile};

/// Remote tier connection settings.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Redis connection URL, credentials included
    /// (e.g. `redis://:secret@cache.internal:6379/0`).
    pub url: String,

    /// Deadline for every remote call; a timeout is treated as a miss.
    pub timeout: Duration,

    /// Maximum number of pooled connections.
    pub pool_size: usize,
}

impl RemoteSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_millis(250),
            pool_size: 16,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Key namespace isolating environments/tenants sharing one remote tier.
    pub key_prefix: String,

    /// Memory tier tuning.
    pub memory: MemoryConfig,

    /// Remote tier settings; `None` runs the engine memory-only.
    pub remote: Option<RemoteSettings>,

    /// TTL used when a `set` passes a zero duration.
    pub default_ttl: Duration,

    /// Deadline for a single aggregate computation; single-flight waiters
    /// are released with an error rather than waiting past it.
    pub compute_timeout: Duration,

    /// Per-volatility TTL tiers for analytics results.
    pub ttl: TtlProfile,

    /// How often the background health probe checks the remote tier.
    pub health_probe_interval: Duration,

    /// Consecutive remote failures before entering degraded mode.
    pub circuit_failure_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_prefix: "strata".to_string(),
            memory: MemoryConfig::default(),
            remote: None,
            default_ttl: Duration::from_secs(300),
            compute_timeout: Duration::from_secs(10),
            ttl: TtlProfile::default(),
            health_probe_interval: Duration::from_secs(15),
            circuit_failure_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset values fall back to defaults.
    /// Setting `STRATA_REDIS_URL` enables the remote tier.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let mut memory = MemoryConfig::default();
        if let Some(max_entries) = read_env("STRATA_MEMORY_MAX_ENTRIES") {
            memory.max_entries = max_entries;
        }
        memory.max_bytes = read_env("STRATA_MEMORY_MAX_BYTES").or(memory.max_bytes);
        if let Some(secs) = read_env("STRATA_MEMORY_TTL_SECS") {
            memory.default_ttl = Duration::from_secs(secs);
        }

        let remote = env::var("STRATA_REDIS_URL").ok().map(|url| {
            let mut settings = RemoteSettings::new(url);
            if let Some(ms) = read_env("STRATA_REMOTE_TIMEOUT_MS") {
                settings.timeout = Duration::from_millis(ms);
            }
            if let Some(size) = read_env("STRATA_REMOTE_POOL_SIZE") {
                settings.pool_size = size;
            }
            settings
        });

        let mut ttl = TtlProfile::default();
        if let Some(secs) = read_env("STRATA_TTL_REALTIME_SECS") {
            ttl.realtime = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("STRATA_TTL_DASHBOARD_SECS") {
            ttl.dashboard = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env("STRATA_TTL_HISTORICAL_SECS") {
            ttl.historical = Duration::from_secs(secs);
        }

        Self {
            key_prefix: env::var("STRATA_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            memory,
            remote,
            default_ttl: read_env("STRATA_DEFAULT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            compute_timeout: read_env("STRATA_COMPUTE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.compute_timeout),
            ttl,
            health_probe_interval: read_env("STRATA_HEALTH_PROBE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_probe_interval),
            circuit_failure_threshold: read_env("STRATA_CIRCUIT_THRESHOLD")
                .unwrap_or(defaults.circuit_failure_threshold),
        }
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_memory_only() {
        let config = EngineConfig::default();
        assert!(config.remote.is_none());
        assert_eq!(config.key_prefix, "strata");
        assert_eq!(config.circuit_failure_threshold, 3);
    }

    #[test]
    fn test_remote_settings_defaults() {
        let settings = RemoteSettings::new("redis://localhost:6379");
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.pool_size, 16);
    }
}
