//! Cache entry types shared by both tiers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A cached value with its invalidation tags and lifetime.
///
/// The value is wrapped in `Arc` so cache hits clone a pointer, not the
/// serialized bytes. Each tier holds its own independent copy of an entry;
/// there is no shared ownership between tiers.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub value: Arc<Vec<u8>>,
    pub tags: Vec<String>,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Create a new entry expiring `ttl` from now.
    pub fn new(value: Vec<u8>, tags: Vec<String>, ttl: Duration) -> Self {
        let size_bytes = value.len() + tags.iter().map(String::len).sum::<usize>();
        let created_at = Instant::now();
        Self {
            value: Arc::new(value),
            tags,
            created_at,
            expires_at: created_at + ttl,
            size_bytes,
        }
    }

    /// Check whether this entry has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Wire form of an entry stored in the remote tier.
///
/// Tags travel with the value so that an instance populating its memory tier
/// from a remote hit can register the key in its own tag index.
#[derive(Debug, Deserialize)]
pub(crate) struct RemoteEnvelope {
    pub value: Vec<u8>,
    pub tags: Vec<String>,
}

/// Borrowed counterpart of [`RemoteEnvelope`] used when writing, to avoid
/// copying the value bytes just to serialize them.
#[derive(Serialize)]
pub(crate) struct RemoteEnvelopeRef<'a> {
    pub value: &'a [u8],
    pub tags: &'a [String],
}
