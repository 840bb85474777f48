//! Analytics module - query specs, key encoding and the optimizer facade.
//!
//! Callers describe an aggregate with an [`AnalyticsQuerySpec`];
//! [`KeyCodec`] turns it into a deterministic cache key plus invalidation
//! tags, and [`AnalyticsOptimizer`] resolves it through the tiered cache,
//! a materialized view snapshot, or a live computation via the
//! [`AggregateStore`] seam - in that order of preference.

mod codec;
mod optimizer;
mod spec;
mod store;

pub use codec::{EncodedQuery, KeyCodec};
pub use optimizer::{AnalyticsOptimizer, backing_view};
pub use spec::{
    AggregateResult, AnalyticsQuerySpec, DateRange, Platform, QueryKind, ResultSource, ScopeId,
};
pub use store::AggregateStore;
