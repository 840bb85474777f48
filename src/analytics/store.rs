//! Seam to the relational store that owns the source-of-truth data.

use async_trait::async_trait;

use super::spec::{AggregateResult, AnalyticsQuerySpec};

/// The aggregate computation collaborator.
///
/// Implemented by the embedding application over its relational store. The
/// engine treats it as opaque: query planning, SQL generation and
/// persistence all live behind this trait. Errors surface to analytics
/// callers exactly as if no cache existed.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Compute an aggregate live against the underlying store.
    async fn compute_live(&self, spec: &AnalyticsQuerySpec) -> anyhow::Result<AggregateResult>;

    /// Read an aggregate from a materialized view snapshot.
    async fn read_view(
        &self,
        view: &str,
        spec: &AnalyticsQuerySpec,
    ) -> anyhow::Result<AggregateResult>;

    /// Rebuild a materialized view snapshot from the raw data.
    async fn refresh_view(&self, view: &str) -> anyhow::Result<()>;
}
