//! Analytics optimizer - the cache-aside facade consumed by callers.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{CacheManager, TtlProfile};
use crate::config::EngineConfig;
use crate::error::CacheError;
use crate::views::MaterializedViewManager;

use super::codec::KeyCodec;
use super::spec::{AggregateResult, AnalyticsQuerySpec, QueryKind};
use super::store::AggregateStore;

/// The materialized view backing each query kind.
///
/// Exhaustive by construction; register these names with the view manager
/// at startup.
pub fn backing_view(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::Dashboard => "daily_analytics",
        QueryKind::Revenue => "revenue_rollup",
        QueryKind::Engagement => "engagement_rollup",
        QueryKind::HashtagPerformance => "hashtag_performance",
    }
}

/// Turns analytics requests into cache-aside lookups.
///
/// A request is encoded to a key and tags, then resolved through the cache
/// manager's single-flight path. On a cold key the computation prefers a
/// fresh materialized view snapshot and falls back to a live aggregate.
/// Results are tagged with their scope, kind and backing view, so writers
/// and view refreshes elsewhere invalidate exactly the dependent entries.
pub struct AnalyticsOptimizer {
    cache: Arc<CacheManager>,
    views: Arc<MaterializedViewManager>,
    store: Arc<dyn AggregateStore>,
    codec: KeyCodec,
    ttl: TtlProfile,
}

impl AnalyticsOptimizer {
    pub fn new(
        cache: Arc<CacheManager>,
        views: Arc<MaterializedViewManager>,
        store: Arc<dyn AggregateStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            cache,
            views,
            store,
            codec: KeyCodec::new(config.key_prefix.clone()),
            ttl: config.ttl.clone(),
        }
    }

    /// Answer an analytics request, from cache when possible.
    ///
    /// Compute failures surface exactly as if no cache existed; cache-layer
    /// trouble never does.
    pub async fn query(&self, spec: &AnalyticsQuerySpec) -> Result<AggregateResult, CacheError> {
        let encoded = self.codec.encode(spec)?;
        let view = backing_view(spec.kind);
        let ttl = self.ttl_for(spec.kind);

        let mut tags = encoded.tags;
        tags.push(format!("view:{view}"));

        let views = Arc::clone(&self.views);
        let store = Arc::clone(&self.store);
        let spec = spec.clone();

        self.cache
            .get_or_compute(&encoded.key, ttl, tags, move || async move {
                if views.is_fresh(view) {
                    match store.read_view(view, &spec).await {
                        Ok(result) => return Ok(result),
                        Err(e) => {
                            warn!(view, error = %format!("{e:#}"), "view read failed, falling back to live aggregate");
                        }
                    }
                }
                store
                    .compute_live(&spec)
                    .await
                    .map_err(|e| CacheError::compute(&e))
            })
            .await
    }

    fn ttl_for(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::Dashboard | QueryKind::Engagement => self.ttl.dashboard,
            QueryKind::Revenue => self.ttl.historical,
            QueryKind::HashtagPerformance => self.ttl.realtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    use crate::analytics::spec::{DateRange, ResultSource, ScopeId};
    use crate::views::ViewDefinition;

    use super::*;

    #[derive(Default)]
    struct StubStore {
        live_calls: AtomicUsize,
        view_calls: AtomicUsize,
    }

    fn sample(spec: &AnalyticsQuerySpec, source: ResultSource) -> AggregateResult {
        let mut metrics = BTreeMap::new();
        metrics.insert("total".to_string(), 5.0);
        AggregateResult {
            kind: spec.kind,
            scope: spec.scope,
            range: spec.range,
            platform: spec.platform,
            metrics,
            computed_at: Utc::now(),
            source,
        }
    }

    #[async_trait]
    impl AggregateStore for StubStore {
        async fn compute_live(
            &self,
            spec: &AnalyticsQuerySpec,
        ) -> anyhow::Result<AggregateResult> {
            self.live_calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample(spec, ResultSource::Live))
        }

        async fn read_view(
            &self,
            view: &str,
            spec: &AnalyticsQuerySpec,
        ) -> anyhow::Result<AggregateResult> {
            self.view_calls.fetch_add(1, Ordering::SeqCst);
            Ok(sample(spec, ResultSource::View { name: view.to_string() }))
        }

        async fn refresh_view(&self, _view: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        store: Arc<StubStore>,
        views: Arc<MaterializedViewManager>,
        optimizer: AnalyticsOptimizer,
    }

    fn harness() -> Harness {
        let mut config = EngineConfig::default();
        config.remote = None;
        let cache = Arc::new(CacheManager::new(&config).unwrap());
        let store = Arc::new(StubStore::default());
        let views = Arc::new(MaterializedViewManager::new(
            Arc::clone(&cache),
            Arc::clone(&store) as Arc<dyn AggregateStore>,
        ));
        let optimizer = AnalyticsOptimizer::new(
            cache,
            Arc::clone(&views),
            Arc::clone(&store) as Arc<dyn AggregateStore>,
            &config,
        );
        Harness { store, views, optimizer }
    }

    fn spec() -> AnalyticsQuerySpec {
        AnalyticsQuerySpec::new(
            QueryKind::Dashboard,
            ScopeId(42),
            DateRange::new(
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
            ),
        )
    }

    #[tokio::test]
    async fn test_query_computes_live_when_view_not_fresh() {
        let h = harness();
        h.views
            .register(ViewDefinition::new("daily_analytics", Duration::from_secs(60)));

        let result = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(result.source, ResultSource::Live);
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.view_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeat_query_is_served_from_cache() {
        let h = harness();
        h.views
            .register(ViewDefinition::new("daily_analytics", Duration::from_secs(60)));

        let first = h.optimizer.query(&spec()).await.unwrap();
        let second = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_prefers_fresh_view_snapshot() {
        let h = harness();
        h.views
            .register(ViewDefinition::new("daily_analytics", Duration::from_secs(60)));
        h.views.refresh("daily_analytics").await.unwrap();

        let result = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(
            result.source,
            ResultSource::View { name: "daily_analytics".to_string() }
        );
        assert_eq!(h.store.view_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_view_refresh_invalidates_cached_queries() {
        let h = harness();
        h.views
            .register(ViewDefinition::new("daily_analytics", Duration::from_secs(60)));

        // First answer is computed live and cached under the view tag.
        let first = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(first.source, ResultSource::Live);

        // The refresh purges it; the next query reads the now-fresh view.
        h.views.refresh("daily_analytics").await.unwrap();
        let second = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(
            second.source,
            ResultSource::View { name: "daily_analytics".to_string() }
        );
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.view_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_spec_never_reaches_the_store() {
        let h = harness();
        let mut bad = spec();
        bad.scope = ScopeId(0);

        let result = h.optimizer.query(&bad).await;
        assert!(matches!(result, Err(CacheError::InvalidSpec(_))));
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ttl_tiers_resolve_by_kind() {
        let h = harness();
        let profile = TtlProfile::default();
        assert_eq!(h.optimizer.ttl_for(QueryKind::Dashboard), profile.dashboard);
        assert_eq!(h.optimizer.ttl_for(QueryKind::Engagement), profile.dashboard);
        assert_eq!(h.optimizer.ttl_for(QueryKind::Revenue), profile.historical);
        assert_eq!(
            h.optimizer.ttl_for(QueryKind::HashtagPerformance),
            profile.realtime
        );
    }

    #[tokio::test]
    async fn test_scope_invalidation_forces_recompute() {
        let h = harness();
        h.views
            .register(ViewDefinition::new("daily_analytics", Duration::from_secs(60)));

        let _ = h.optimizer.query(&spec()).await.unwrap();
        // A writer inserted a usage row for scope 42.
        assert_eq!(h.optimizer.cache.invalidate_tag("scope:42").await, 1);

        let _ = h.optimizer.query(&spec()).await.unwrap();
        assert_eq!(h.store.live_calls.load(Ordering::SeqCst), 2);
    }
}
