//! Strata - Tiered cache and analytics aggregation engine.
//!
//! Answers expensive, frequently-repeated aggregate queries (usage
//! dashboards, revenue and engagement analytics, hashtag performance) with
//! bounded latency while staying consistent with an underlying relational
//! store. The cache is strictly a performance layer: its failures never
//! become query failures.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `error` - Typed error taxonomy
//! - `cache` - Memory + Redis tiers, tag index, single-flight, pub/sub invalidation
//! - `analytics` - Query specs, key codec, optimizer facade
//! - `views` - Materialized view registry and refresh scheduler
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = EngineConfig::from_env();
//! let cache = Arc::new(CacheManager::new(&config)?);
//! let views = Arc::new(MaterializedViewManager::new(cache.clone(), store.clone()));
//! views.register(ViewDefinition::new("daily_analytics", Duration::from_secs(300)));
//!
//! cache.start();
//! views.start();
//!
//! let optimizer = AnalyticsOptimizer::new(cache.clone(), views.clone(), store, &config);
//! let result = optimizer.query(&spec).await?;
//!
//! // Writers elsewhere, after mutating data analytics depend on:
//! cache.invalidate_tag("scope:42").await;
//! ```

pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod views;

pub use analytics::{
    AggregateResult, AggregateStore, AnalyticsOptimizer, AnalyticsQuerySpec, DateRange,
    EncodedQuery, KeyCodec, Platform, QueryKind, ResultSource, ScopeId, backing_view,
};
pub use cache::{CacheManager, CacheStats, HealthReport, MemoryConfig, TierStats, TtlProfile};
pub use config::{EngineConfig, RemoteSettings};
pub use error::CacheError;
pub use views::{MaterializedViewManager, ViewDefinition, ViewState, ViewStatus};
