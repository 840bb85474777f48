//! In-process memory tier with strict LRU eviction.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use super::config::MemoryConfig;
use super::entry::CacheEntry;

/// Result of a memory tier lookup.
pub(crate) enum MemoryLookup {
    /// Live entry; the lookup counted as an LRU touch.
    Hit(Arc<Vec<u8>>),
    /// An entry existed but outlived its TTL; it has been dropped and the
    /// caller must detach the key from the tag index.
    Expired,
    Miss,
}

/// Entries displaced by an insertion.
///
/// `replaced` is the previous entry under the same key (not an eviction);
/// `evicted` are entries pushed out by the entry-count or byte budget, whose
/// keys must be detached from the tag index.
#[derive(Default)]
pub(crate) struct InsertOutcome {
    #[allow(dead_code)]
    pub replaced: Option<CacheEntry>,
    pub evicted: Vec<(String, CacheEntry)>,
}

/// Bounded in-process cache, the fastest tier.
///
/// A single mutex guards the LRU structure; it is only held for map
/// operations and never across I/O. Expired entries are dropped lazily on
/// access, so the entry-count bound is the hard capacity limit.
pub(crate) struct MemoryTier {
    inner: Mutex<Inner>,
    max_bytes: Option<usize>,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    bytes: usize,
}

impl MemoryTier {
    pub fn new(config: &MemoryConfig) -> Self {
        let capacity = config.max_entries.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(
                    NonZeroUsize::new(capacity).expect("capacity must be > 0"),
                ),
                bytes: 0,
            }),
            max_bytes: config.max_bytes,
        }
    }

    /// Look up a key, touching it in LRU order on a live hit.
    pub fn lookup(&self, key: &str) -> MemoryLookup {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            None => return MemoryLookup::Miss,
            Some(entry) if entry.is_expired() => true,
            Some(entry) => return MemoryLookup::Hit(entry.value.clone()),
        };
        debug_assert!(expired);
        if let Some(old) = inner.entries.pop(key) {
            inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
        }
        MemoryLookup::Expired
    }

    /// Insert an entry, reporting whatever it displaced.
    pub fn insert(&self, key: &str, entry: CacheEntry) -> InsertOutcome {
        let mut inner = self.inner.lock();
        let mut outcome = InsertOutcome::default();

        inner.bytes += entry.size_bytes;
        match inner.entries.push(key.to_string(), entry) {
            Some((old_key, old)) if old_key == key => {
                inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
                outcome.replaced = Some(old);
            }
            Some((old_key, old)) => {
                inner.bytes = inner.bytes.saturating_sub(old.size_bytes);
                outcome.evicted.push((old_key, old));
            }
            None => {}
        }

        if let Some(budget) = self.max_bytes {
            while inner.bytes > budget && !inner.entries.is_empty() {
                let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                    break;
                };
                inner.bytes = inner.bytes.saturating_sub(evicted.size_bytes);
                outcome.evicted.push((evicted_key, evicted));
            }
        }

        outcome
    }

    /// Remove a key outright (invalidation).
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop(key)?;
        inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Bytes currently accounted for by cached values.
    #[allow(dead_code)]
    pub fn bytes(&self) -> usize {
        self.inner.lock().bytes
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn entry(value: &[u8]) -> CacheEntry {
        CacheEntry::new(value.to_vec(), vec![], Duration::from_secs(60))
    }

    fn hit(tier: &MemoryTier, key: &str) -> bool {
        matches!(tier.lookup(key), MemoryLookup::Hit(_))
    }

    #[test]
    fn test_insert_then_lookup() {
        let tier = MemoryTier::new(&MemoryConfig::with_capacity(4));
        tier.insert("k", entry(b"v"));

        match tier.lookup("k") {
            MemoryLookup::Hit(value) => assert_eq!(&**value, b"v"),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn test_lru_eviction_past_capacity() {
        let tier = MemoryTier::new(&MemoryConfig::with_capacity(3));
        tier.insert("k1", entry(b"1"));
        tier.insert("k2", entry(b"2"));
        tier.insert("k3", entry(b"3"));

        let outcome = tier.insert("k4", entry(b"4"));
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].0, "k1");

        assert!(!hit(&tier, "k1"));
        assert!(hit(&tier, "k2"));
        assert_eq!(tier.len(), 3);
    }

    #[test]
    fn test_lookup_touches_lru_order() {
        let tier = MemoryTier::new(&MemoryConfig::with_capacity(3));
        tier.insert("k1", entry(b"1"));
        tier.insert("k2", entry(b"2"));
        tier.insert("k3", entry(b"3"));

        // Touch k1 so k2 becomes least recently used.
        assert!(hit(&tier, "k1"));
        let outcome = tier.insert("k4", entry(b"4"));
        assert_eq!(outcome.evicted[0].0, "k2");
        assert!(hit(&tier, "k1"));
    }

    #[test]
    fn test_replace_is_not_an_eviction() {
        let tier = MemoryTier::new(&MemoryConfig::with_capacity(2));
        tier.insert("k", entry(b"old"));
        let outcome = tier.insert("k", entry(b"new"));

        assert!(outcome.replaced.is_some());
        assert!(outcome.evicted.is_empty());
        match tier.lookup("k") {
            MemoryLookup::Hit(value) => assert_eq!(&**value, b"new"),
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn test_expired_entry_is_dropped_on_access() {
        let tier = MemoryTier::new(&MemoryConfig::with_capacity(2));
        tier.insert("k", CacheEntry::new(b"v".to_vec(), vec![], Duration::ZERO));

        assert!(matches!(tier.lookup("k"), MemoryLookup::Expired));
        assert!(matches!(tier.lookup("k"), MemoryLookup::Miss));
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_byte_budget_evicts_lru() {
        let config = MemoryConfig::with_capacity(16).max_bytes(8);
        let tier = MemoryTier::new(&config);
        tier.insert("k1", entry(b"aaaa")); // 4 bytes
        tier.insert("k2", entry(b"bbbb")); // 8 bytes total

        let outcome = tier.insert("k3", entry(b"cc")); // over budget
        assert_eq!(outcome.evicted[0].0, "k1");
        assert!(tier.bytes() <= 8);
        assert!(hit(&tier, "k2"));
        assert!(hit(&tier, "k3"));
    }
}
