//! Cache manager - tiered get/set/invalidate behind one API.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::CacheError;

use super::entry::{CacheEntry, RemoteEnvelopeRef};
use super::flight::{self, FlightRole, SingleFlightGuard};
use super::memory::{MemoryLookup, MemoryTier};
use super::pubsub::{self, InvalidationListener};
use super::remote::RemoteTier;
use super::stats::{CacheStats, HealthReport, TierCounters};
use super::tags::TagIndex;

/// Extra time followers wait past the compute deadline, so the leader's own
/// timeout error reaches them before their wait gives up.
const FLIGHT_GRACE: Duration = Duration::from_millis(100);

/// How long `stop` waits for background tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct CacheCounters {
    memory: TierCounters,
    remote: TierCounters,
}

/// Circuit-breaker state for the remote tier, shared with the background
/// health probe.
struct RemoteHealth {
    degraded: AtomicBool,
    failures: AtomicU32,
    threshold: u32,
}

impl RemoteHealth {
    fn new(threshold: u32) -> Self {
        Self {
            degraded: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            threshold,
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("remote tier recovered, leaving degraded mode");
        }
    }

    fn note_failure(&self, error: &CacheError) {
        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold && !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(failures, error = %error, "remote tier failing repeatedly, entering degraded mode");
        } else {
            debug!(failures, error = %error, "remote tier operation failed");
        }
    }
}

/// Probe the remote tier once, updating circuit-breaker state.
async fn probe(remote: &RemoteTier, health: &RemoteHealth) -> bool {
    match remote.ping().await {
        Ok(()) => {
            health.note_success();
            true
        }
        Err(e) => {
            health.note_failure(&e);
            false
        }
    }
}

/// Tiered cache: memory first, remote second, tag index kept exact across
/// sets, evictions and invalidations.
///
/// An explicit instance with a `start`/`stop` lifecycle, passed by reference
/// to its consumers; there is no ambient global. Cache failures never become
/// caller failures: remote trouble degrades to memory-only operation and a
/// miss at worst forces a recomputation.
pub struct CacheManager {
    memory: Arc<MemoryTier>,
    tags: Arc<TagIndex>,
    remote: Option<RemoteTier>,
    flight: SingleFlightGuard,
    counters: CacheCounters,
    health: Arc<RemoteHealth>,

    default_ttl: Duration,
    memory_default_ttl: Duration,
    compute_timeout: Duration,
    health_probe_interval: Duration,
    invalidation_channel: String,

    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheManager {
    /// Create a manager from the engine config.
    ///
    /// Without a remote section the manager runs memory-only; that is the
    /// configured single-instance mode, not degradation.
    pub fn new(config: &EngineConfig) -> Result<Self, CacheError> {
        let remote = config
            .remote
            .as_ref()
            .map(RemoteTier::connect)
            .transpose()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            memory: Arc::new(MemoryTier::new(&config.memory)),
            tags: Arc::new(TagIndex::new()),
            remote,
            flight: SingleFlightGuard::new(),
            counters: CacheCounters {
                memory: TierCounters::default(),
                remote: TierCounters::default(),
            },
            health: Arc::new(RemoteHealth::new(config.circuit_failure_threshold)),
            default_ttl: config.default_ttl,
            memory_default_ttl: config.memory.default_ttl,
            compute_timeout: config.compute_timeout,
            health_probe_interval: config.health_probe_interval,
            invalidation_channel: format!("{}:invalidate", config.key_prefix),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start background tasks: the remote health probe loop and the
    /// cross-instance invalidation listener. A no-op in memory-only mode.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        if let Some(remote) = &self.remote {
            let remote_probe = remote.clone();
            let health = Arc::clone(&self.health);
            let mut shutdown = self.shutdown_tx.subscribe();
            let interval = self.health_probe_interval;
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(interval) => {
                            probe(&remote_probe, &health).await;
                        }
                    }
                }
                debug!("health probe loop stopped");
            }));

            let listener = InvalidationListener {
                url: remote.url().to_string(),
                channel: self.invalidation_channel.clone(),
                memory: Arc::clone(&self.memory),
                tags: Arc::clone(&self.tags),
            };
            tasks.push(listener.spawn(self.shutdown_tx.subscribe()));

            info!("cache manager started (memory + remote tiers)");
        } else {
            info!("cache manager started (memory tier only)");
        }
    }

    /// Signal background tasks and wait for them to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        info!("cache manager stopped");
    }

    /// Tiered lookup: memory first, then remote with promotion.
    ///
    /// A remote timeout or error is a miss, never an error; the caller
    /// always gets an answer within the remote deadline.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let start = Instant::now();
        match self.memory.lookup(key) {
            MemoryLookup::Hit(value) => {
                self.counters.memory.record_hit(start.elapsed());
                return Some(value);
            }
            MemoryLookup::Expired => {
                self.tags.remove_key(key);
                self.counters.memory.record_miss(start.elapsed());
            }
            MemoryLookup::Miss => {
                self.counters.memory.record_miss(start.elapsed());
            }
        }

        let remote = self.remote.as_ref()?;
        if self.health.is_degraded() {
            return None;
        }

        let start = Instant::now();
        match remote.get(key).await {
            Ok(Some(envelope)) => {
                self.counters.remote.record_hit(start.elapsed());
                self.health.note_success();
                // Promote into memory; the remaining remote TTL is unknown,
                // so the memory default applies.
                let entry =
                    CacheEntry::new(envelope.value, envelope.tags, self.memory_default_ttl);
                let value = entry.value.clone();
                self.insert_local(key, entry);
                debug!(key, "remote tier hit, promoted to memory");
                Some(value)
            }
            Ok(None) => {
                self.counters.remote.record_miss(start.elapsed());
                self.health.note_success();
                None
            }
            Err(e) => {
                self.counters.remote.record_miss(start.elapsed());
                self.health.note_failure(&e);
                None
            }
        }
    }

    /// Write a value to both tiers and register its tags.
    ///
    /// The remote write is fire-and-forget and skipped while degraded;
    /// failures are logged and never surface, because the cache is a
    /// performance layer, not a correctness dependency.
    pub async fn set(&self, key: &str, value: Vec<u8>, tags: &[String], ttl: Duration) {
        let _ = self.store(key, value, tags, ttl).await;
    }

    async fn store(
        &self,
        key: &str,
        value: Vec<u8>,
        tags: &[String],
        ttl: Duration,
    ) -> Arc<Vec<u8>> {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let entry = CacheEntry::new(value, tags.to_vec(), ttl);
        let stored = entry.value.clone();
        self.insert_local(key, entry);

        if let Some(remote) = &self.remote {
            if self.health.is_degraded() {
                debug!(key, "remote tier degraded, skipping remote write");
            } else {
                let envelope = RemoteEnvelopeRef {
                    value: stored.as_slice(),
                    tags,
                };
                match serde_json::to_vec(&envelope) {
                    Ok(payload) => {
                        let remote = remote.clone();
                        let key = key.to_string();
                        tokio::spawn(async move {
                            if let Err(e) = remote.set(&key, payload, ttl).await {
                                warn!(key = %key, error = %e, "remote tier write failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(key, error = %e, "envelope serialization failed, remote write skipped");
                    }
                }
            }
        }

        stored
    }

    fn insert_local(&self, key: &str, entry: CacheEntry) {
        self.tags.register(key, &entry.tags);
        let outcome = self.memory.insert(key, entry);
        for (evicted_key, _) in &outcome.evicted {
            self.tags.remove_key(evicted_key);
            self.counters.memory.record_eviction();
        }
    }

    /// Purge every entry registered under `tag` from both tiers.
    ///
    /// Returns the number of keys purged on this instance. Once this
    /// returns, no later `get` on this process can observe a purged entry;
    /// other instances converge via pub/sub and, failing that, TTL.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let keys = self.tags.take_tag(tag);
        for key in &keys {
            self.memory.remove(key);
        }

        if let Some(remote) = &self.remote {
            if self.health.is_degraded() {
                debug!(tag, "remote tier degraded, skipping remote invalidation");
            } else {
                if let Err(e) = remote.delete(&keys).await {
                    self.health.note_failure(&e);
                    warn!(tag, error = %e, "remote delete failed during invalidation");
                }
                if let Err(e) = pubsub::publish_invalidation(
                    remote.pool(),
                    &self.invalidation_channel,
                    tag,
                    remote.timeout(),
                )
                .await
                {
                    warn!(tag, error = %e, "invalidation publish failed");
                }
            }
        }

        debug!(tag, purged = keys.len(), "tag invalidated");
        keys.len()
    }

    /// Cache-aside read with single-flight protection.
    ///
    /// On a cold key exactly one caller runs `compute` (bounded by the
    /// compute timeout); concurrent callers await that outcome. A
    /// successful result is cached under `tags` with `ttl`; a failed or
    /// timed-out computation caches nothing and every waiter sees the same
    /// error. A result that cannot be serialized is returned uncached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tags: Vec<String>,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        if let Some(value) = self.get_deserialized(key).await {
            return Ok(value);
        }

        match self.flight.begin(key) {
            FlightRole::Follower(rx) => {
                match flight::await_outcome(rx, self.compute_timeout + FLIGHT_GRACE).await {
                    Ok(bytes) => serde_json::from_slice(&bytes).map_err(CacheError::from),
                    Err(CacheError::Serialization(_)) => {
                        // The leader computed a value it could not cache;
                        // recompute locally without caching.
                        match tokio::time::timeout(self.compute_timeout, compute()).await {
                            Ok(result) => result,
                            Err(_) => Err(CacheError::ComputeTimeout(self.compute_timeout)),
                        }
                    }
                    Err(e) => Err(e),
                }
            }
            FlightRole::Leader(permit) => {
                // Double-check both tiers: a previous flight may have landed
                // between our miss and taking leadership.
                if let Some(bytes) = self.get(key).await {
                    if let Ok(value) = serde_json::from_slice::<T>(&bytes) {
                        permit.complete(Ok(bytes));
                        return Ok(value);
                    }
                }

                match tokio::time::timeout(self.compute_timeout, compute()).await {
                    Ok(Ok(value)) => {
                        match serde_json::to_vec(&value) {
                            Ok(bytes) => {
                                let stored = self.store(key, bytes, &tags, ttl).await;
                                permit.complete(Ok(stored));
                            }
                            Err(e) => {
                                warn!(key, error = %e, "serialization failed, result not cached");
                                permit.complete(Err(CacheError::from(e)));
                            }
                        }
                        Ok(value)
                    }
                    Ok(Err(e)) => {
                        permit.complete(Err(e.clone()));
                        Err(e)
                    }
                    Err(_) => {
                        let e = CacheError::ComputeTimeout(self.compute_timeout);
                        permit.complete(Err(e.clone()));
                        Err(e)
                    }
                }
            }
        }
    }

    async fn get_deserialized<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached value failed to deserialize, dropping entry");
                self.memory.remove(key);
                self.tags.remove_key(key);
                None
            }
        }
    }

    /// Per-tier hit/miss/eviction counts and rolling average latency since
    /// the last reset.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: self.counters.memory.snapshot(),
            remote: self.counters.remote.snapshot(),
        }
    }

    /// Reset all tier counters.
    pub fn reset_stats(&self) {
        self.counters.memory.reset();
        self.counters.remote.reset();
    }

    /// Probe the remote tier (bounded by its timeout) and report health.
    pub async fn health(&self) -> HealthReport {
        let remote_reachable = match &self.remote {
            None => false,
            Some(remote) => probe(remote, &self.health).await,
        };
        HealthReport {
            remote_reachable,
            degraded: self.remote.is_some() && self.health.is_degraded(),
        }
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("memory_entries", &self.memory.len())
            .field("remote_configured", &self.remote.is_some())
            .field("degraded", &self.health.is_degraded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::future::join_all;
    use serde_json::json;

    use super::*;

    fn manager() -> CacheManager {
        let mut config = EngineConfig::default();
        config.compute_timeout = Duration::from_millis(500);
        CacheManager::new(&config).expect("memory-only manager")
    }

    fn manager_with_capacity(max_entries: usize) -> CacheManager {
        let mut config = EngineConfig::default();
        config.memory.max_entries = max_entries;
        CacheManager::new(&config).expect("memory-only manager")
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = manager();
        cache
            .set("k", b"v".to_vec(), &["scope:1".into()], Duration::from_secs(60))
            .await;

        let value = cache.get("k").await.expect("hit");
        assert_eq!(&**value, b"v");

        let stats = cache.stats();
        assert_eq!(stats.memory.hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate_tag_scenario() {
        let cache = manager();
        let value = serde_json::to_vec(&json!({ "total": 5 })).unwrap();
        cache
            .set(
                "u:42:dashboard",
                value.clone(),
                &["scope:42".into(), "view:daily_analytics".into()],
                Duration::from_secs(60),
            )
            .await;

        assert_eq!(&**cache.get("u:42:dashboard").await.unwrap(), &value);
        assert_eq!(cache.invalidate_tag("scope:42").await, 1);
        assert!(cache.get("u:42:dashboard").await.is_none());

        // The key's other tag membership went with it.
        assert_eq!(cache.invalidate_tag("view:daily_analytics").await, 0);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = manager();
        cache
            .set("k", b"v".to_vec(), &[], Duration::from_millis(100))
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_lru_bound_and_eviction_stats() {
        let cache = manager_with_capacity(3);
        for key in ["k1", "k2", "k3", "k4"] {
            cache
                .set(key, b"v".to_vec(), &["scope:1".into()], Duration::from_secs(60))
                .await;
        }

        assert!(cache.get("k1").await.is_none());
        assert!(cache.get("k4").await.is_some());
        assert_eq!(cache.stats().memory.evictions, 1);

        // The evicted key was detached from its tag: only 3 keys remain.
        assert_eq!(cache.invalidate_tag("scope:1").await, 3);
    }

    #[tokio::test]
    async fn test_get_or_compute_single_flight() {
        let cache = Arc::new(manager());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("cold", Duration::from_secs(60), vec![], move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(7u64)
                        })
                        .await
                })
            })
            .collect();

        for result in join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_caches_nothing() {
        let cache = manager();
        let result: Result<u64, _> = cache
            .get_or_compute("k", Duration::from_secs(60), vec![], || async {
                Err(CacheError::Compute("aggregate query failed".into()))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));
        assert!(cache.get("k").await.is_none());

        // The flight is released; a later computation succeeds.
        let value: u64 = cache
            .get_or_compute("k", Duration::from_secs(60), vec![], || async { Ok(9u64) })
            .await
            .unwrap();
        assert_eq!(value, 9);
    }

    #[tokio::test]
    async fn test_compute_timeout() {
        let mut config = EngineConfig::default();
        config.compute_timeout = Duration::from_millis(50);
        let cache = CacheManager::new(&config).unwrap();

        let result: Result<u64, _> = cache
            .get_or_compute("slow", Duration::from_secs(60), vec![], || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1u64)
            })
            .await;
        assert!(matches!(result, Err(CacheError::ComputeTimeout(_))));
        assert!(cache.get("slow").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_only_health_and_set() {
        let cache = manager();
        let health = cache.health().await;
        assert!(!health.remote_reachable);
        assert!(!health.degraded);

        cache.set("k", b"v".to_vec(), &[], Duration::from_secs(60)).await;
        assert!(cache.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let cache = manager();
        cache.set("k", b"v".to_vec(), &[], Duration::from_secs(60)).await;
        let _ = cache.get("k").await;
        let _ = cache.get("missing").await;

        let stats = cache.stats();
        assert_eq!(stats.memory.hits, 1);
        assert_eq!(stats.memory.misses, 1);

        cache.reset_stats();
        let stats = cache.stats();
        assert_eq!(stats.memory.hits, 0);
        assert_eq!(stats.memory.misses, 0);
    }

    #[tokio::test]
    async fn test_lifecycle_memory_only() {
        let cache = Arc::new(manager());
        cache.start();
        cache.set("k", b"v".to_vec(), &[], Duration::from_secs(60)).await;
        cache.stop().await;
        assert!(cache.get("k").await.is_some());
    }

    #[test]
    fn test_degraded_after_repeated_failures() {
        let health = RemoteHealth::new(3);
        let error = CacheError::RemoteUnavailable("PING timed out".into());

        health.note_failure(&error);
        health.note_failure(&error);
        assert!(!health.is_degraded());
        health.note_failure(&error);
        assert!(health.is_degraded());

        health.note_success();
        assert!(!health.is_degraded());
    }
}
