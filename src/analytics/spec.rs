//! Analytics query specifications and aggregate results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The aggregate families served by the engine.
///
/// An exhaustive enum rather than free-form metadata, so the key codec's
/// mapping to keys and tags is statically checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Usage dashboard aggregates (generations, credits, activity).
    Dashboard,
    /// Revenue analytics over payments.
    Revenue,
    /// Engagement analytics over published content.
    Engagement,
    /// Hashtag performance samples.
    HashtagPerformance,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Revenue => "revenue",
            Self::Engagement => "engagement",
            Self::HashtagPerformance => "hashtag_performance",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of the user or organization a query is scoped to.
///
/// Zero is reserved and rejected as an unscoped query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Inclusive date range of an analytics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }
}

/// Publishing platforms content is tracked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    TikTok,
    YouTube,
    Twitter,
    LinkedIn,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::YouTube => "youtube",
            Self::Twitter => "twitter",
            Self::LinkedIn => "linkedin",
        }
    }
}

/// An analytics request, immutable after construction.
///
/// Used purely to derive a cache key and invalidation tags; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsQuerySpec {
    pub kind: QueryKind,
    pub scope: ScopeId,
    pub range: DateRange,
    pub platform: Option<Platform>,
}

impl AnalyticsQuerySpec {
    pub fn new(kind: QueryKind, scope: ScopeId, range: DateRange) -> Self {
        Self {
            kind,
            scope,
            range,
            platform: None,
        }
    }

    /// Narrow the query to one platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Reject malformed specs before any cache access.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.scope.0 == 0 {
            return Err(CacheError::InvalidSpec(
                "scope id must be non-zero".to_string(),
            ));
        }
        if self.range.from > self.range.to {
            return Err(CacheError::InvalidSpec(format!(
                "date range is inverted: {} > {}",
                self.range.from, self.range.to
            )));
        }
        Ok(())
    }
}

/// Where an aggregate's numbers came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// Computed live against the relational store.
    Live,
    /// Read from a materialized view snapshot.
    View { name: String },
}

/// A computed aggregate, as served to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub kind: QueryKind,
    pub scope: ScopeId,
    pub range: DateRange,
    pub platform: Option<Platform>,
    /// Metric name → value, in deterministic order.
    pub metrics: BTreeMap<String, f64>,
    pub computed_at: DateTime<Utc>,
    pub source: ResultSource,
}
