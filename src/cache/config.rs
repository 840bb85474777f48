//! Cache tuning configuration.

use std::time::Duration;

/// Configuration for the in-process memory tier.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Maximum number of entries held in memory.
    /// On insertion past capacity, the least recently used entry is evicted.
    pub max_entries: usize,

    /// Optional byte budget for cached values.
    /// When set, least recently used entries are evicted until the tier fits.
    pub max_bytes: Option<usize>,

    /// TTL applied to entries populated from the remote tier, where the
    /// remaining remote lifetime is unknown.
    pub default_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: None,
            default_ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl MemoryConfig {
    /// Create a new memory config with the given max entry count.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }

    /// Set the byte budget (builder pattern).
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Set the default TTL for remotely populated entries.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

/// TTL tiers keyed by data volatility.
///
/// Near-real-time data gets seconds, dashboard aggregates low minutes,
/// historical/revenue reports tens of minutes. All three are tunable
/// configuration, not constants baked into call sites.
#[derive(Debug, Clone)]
pub struct TtlProfile {
    /// High-volatility data (e.g. hashtag performance samples).
    pub realtime: Duration,

    /// Near-real-time dashboard aggregates.
    pub dashboard: Duration,

    /// Historical and revenue reports that change slowly.
    pub historical: Duration,
}

impl Default for TtlProfile {
    fn default() -> Self {
        Self {
            realtime: Duration::from_secs(30),
            dashboard: Duration::from_secs(120), // 2 minutes
            historical: Duration::from_secs(1800), // 30 minutes
        }
    }
}

impl TtlProfile {
    /// Set the realtime tier.
    #[must_use]
    pub fn realtime(mut self, ttl: Duration) -> Self {
        self.realtime = ttl;
        self
    }

    /// Set the dashboard tier.
    #[must_use]
    pub fn dashboard(mut self, ttl: Duration) -> Self {
        self.dashboard = ttl;
        self
    }

    /// Set the historical tier.
    #[must_use]
    pub fn historical(mut self, ttl: Duration) -> Self {
        self.historical = ttl;
        self
    }
}
