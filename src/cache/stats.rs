//! Per-tier cache statistics and health reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Atomic counters for one tier.
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    latency_ns: AtomicU64,
    samples: AtomicU64,
}

impl TierCounters {
    pub fn record_hit(&self, latency: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency: Duration) {
        self.latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TierStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let avg_latency_ms = if samples == 0 {
            0.0
        } else {
            self.latency_ns.load(Ordering::Relaxed) as f64 / samples as f64 / 1_000_000.0
        };
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            avg_latency_ms,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.latency_ns.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of one tier's counters since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub avg_latency_ms: f64,
}

/// Snapshot of both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory: TierStats,
    pub remote: TierStats,
}

/// Cache health as seen from this instance.
///
/// `degraded` means the remote tier has failed repeatedly and is being
/// skipped; the memory tier keeps serving and callers see no errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub remote_reachable: bool,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let counters = TierCounters::default();
        counters.record_hit(Duration::from_millis(2));
        counters.record_miss(Duration::from_millis(4));
        counters.record_eviction();

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert!((stats.avg_latency_ms - 3.0).abs() < 0.5);

        counters.reset();
        let stats = counters.snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
    }
}
