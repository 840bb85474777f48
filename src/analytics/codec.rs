//! Key codec - deterministic mapping from query specs to keys and tags.

use crate::error::CacheError;

use super::spec::AnalyticsQuerySpec;

/// A spec rendered into its cache key and invalidation tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedQuery {
    pub key: String,
    pub tags: Vec<String>,
}

/// Pure, deterministic encoder from [`AnalyticsQuerySpec`] to cache keys.
///
/// Fields are rendered in a fixed canonical order, so identical specs
/// always produce identical keys and tag sets. The configured namespace
/// isolates keys across environments and tenants sharing one remote tier
/// and is invisible above this layer. No side effects, no I/O.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    namespace: String,
}

impl KeyCodec {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Encode a spec, rejecting malformed ones before any cache access.
    ///
    /// Tags are derived structurally - one per axis a writer might
    /// invalidate by: `scope:<id>`, `kind:<kind>`, and `platform:<p>`
    /// when the query is platform-narrowed.
    pub fn encode(&self, spec: &AnalyticsQuerySpec) -> Result<EncodedQuery, CacheError> {
        spec.validate()?;

        let platform = spec.platform.map_or("all", |p| p.as_str());
        let key = format!(
            "{}:v1:{}:{}:{}:{}:{}",
            self.namespace,
            spec.kind.as_str(),
            spec.scope,
            spec.range.from,
            spec.range.to,
            platform
        );

        let mut tags = vec![
            format!("scope:{}", spec.scope),
            format!("kind:{}", spec.kind.as_str()),
        ];
        if let Some(p) = spec.platform {
            tags.push(format!("platform:{}", p.as_str()));
        }

        Ok(EncodedQuery { key, tags })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::analytics::spec::{DateRange, Platform, QueryKind, ScopeId};

    use super::*;

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

    #[test]
    fn test_encode_is_deterministic() {
        let codec = KeyCodec::new("strata");
        let a = codec.encode(&spec()).unwrap();
        let b = codec.encode(&spec()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key, "strata:v1:dashboard:42:2026-07-01:2026-07-31:all");
    }

    #[test]
    fn test_encode_derives_structural_tags() {
        let codec = KeyCodec::new("strata");
        let encoded = codec.encode(&spec()).unwrap();
        assert_eq!(
            encoded.tags,
            vec!["scope:42".to_string(), "kind:dashboard".to_string()]
        );

        let narrowed = codec
            .encode(&spec().with_platform(Platform::Instagram))
            .unwrap();
        assert!(narrowed.tags.contains(&"platform:instagram".to_string()));
        assert!(narrowed.key.ends_with(":instagram"));
    }

    #[test]
    fn test_namespace_isolates_keys() {
        let staging = KeyCodec::new("staging").encode(&spec()).unwrap();
        let prod = KeyCodec::new("prod").encode(&spec()).unwrap();
        assert_ne!(staging.key, prod.key);
        // Tags are namespace-free; writers invalidate the same way everywhere.
        assert_eq!(staging.tags, prod.tags);
    }

    #[test]
    fn test_encode_rejects_invalid_spec() {
        let codec = KeyCodec::new("strata");
        let mut bad = spec();
        bad.scope = ScopeId(0);
        assert!(matches!(
            codec.encode(&bad),
            Err(CacheError::InvalidSpec(_))
        ));
    }
}
