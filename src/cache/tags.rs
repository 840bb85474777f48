//! Tag index - maps invalidation tags to dependent cache keys.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Bidirectional index between tags and cache keys.
///
/// A key appears under a tag iff a live entry for that key was registered
/// with the tag and has not since been invalidated or evicted. The reverse
/// map keeps membership exact: removing a key detaches it from every tag it
/// was registered under, and tag buckets that become empty are dropped, so
/// the index never grows unboundedly.
///
/// Locks are only held for map operations, never across I/O.
#[derive(Debug, Default)]
pub(crate) struct TagIndex {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under every tag in `tags`, replacing any previous
    /// registration for the same key.
    pub fn register(&self, key: &str, tags: &[String]) {
        let mut inner = self.inner.write();
        Self::detach(&mut inner, key);
        if tags.is_empty() {
            return;
        }
        let tag_set: HashSet<String> = tags.iter().cloned().collect();
        for tag in &tag_set {
            inner
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner.by_key.insert(key.to_string(), tag_set);
    }

    /// Remove a key from the index entirely (eviction, expiry, explicit removal).
    pub fn remove_key(&self, key: &str) {
        let mut inner = self.inner.write();
        Self::detach(&mut inner, key);
    }

    /// Atomically collect and detach every key registered under `tag`.
    ///
    /// The returned keys are fully removed from the index, including their
    /// memberships under other tags.
    pub fn take_tag(&self, tag: &str) -> Vec<String> {
        let mut inner = self.inner.write();
        let Some(keys) = inner.by_tag.remove(tag) else {
            return Vec::new();
        };
        let keys: Vec<String> = keys.into_iter().collect();
        for key in &keys {
            Self::detach(&mut inner, key);
        }
        keys
    }

    fn detach(inner: &mut Inner, key: &str) {
        let Some(tags) = inner.by_key.remove(key) else {
            return;
        };
        for tag in &tags {
            if let Some(keys) = inner.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    inner.by_tag.remove(tag);
                }
            }
        }
    }

    /// Number of distinct tags currently indexed.
    #[allow(dead_code)]
    pub fn tag_count(&self) -> usize {
        self.inner.read().by_tag.len()
    }

    /// Number of distinct keys currently indexed.
    #[allow(dead_code)]
    pub fn key_count(&self) -> usize {
        self.inner.read().by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_take() {
        let index = TagIndex::new();
        index.register("k1", &["scope:42".into(), "kind:dashboard".into()]);
        index.register("k2", &["scope:42".into()]);

        let mut keys = index.take_tag("scope:42");
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);

        // k1's other membership was detached along with it
        assert!(index.take_tag("kind:dashboard").is_empty());
        assert_eq!(index.tag_count(), 0);
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_reregister_replaces_tags() {
        let index = TagIndex::new();
        index.register("k", &["scope:1".into()]);
        index.register("k", &["scope:2".into()]);

        assert!(index.take_tag("scope:1").is_empty());
        assert_eq!(index.take_tag("scope:2"), vec!["k".to_string()]);
    }

    #[test]
    fn test_remove_key_drops_empty_buckets() {
        let index = TagIndex::new();
        index.register("k", &["scope:9".into(), "kind:revenue".into()]);
        index.remove_key("k");

        assert_eq!(index.tag_count(), 0);
        assert_eq!(index.key_count(), 0);
        assert!(index.take_tag("scope:9").is_empty());
    }

    #[test]
    fn test_take_unknown_tag() {
        let index = TagIndex::new();
        assert!(index.take_tag("scope:404").is_empty());
    }
}
