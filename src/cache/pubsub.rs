//! Redis Pub/Sub for cross-instance tag invalidation.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CacheError;

use super::memory::MemoryTier;
use super::tags::TagIndex;

/// Listens for tag invalidations published by other instances and drops the
/// matching memory-tier entries locally.
///
/// Uses a dedicated Redis client (SUBSCRIBE cannot share pooled
/// connections) and reconnects with capped exponential backoff when the
/// connection is lost. Received invalidations are applied locally only and
/// never re-published.
pub(crate) struct InvalidationListener {
    pub url: String,
    pub channel: String,
    pub memory: Arc<MemoryTier>,
    pub tags: Arc<TagIndex>,
}

const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(300);

impl InvalidationListener {
    /// Start listening until the shutdown signal fires.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = RECONNECT_BACKOFF_BASE;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                match self.run(&mut shutdown).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "invalidation listener error, reconnecting"
                        );
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    }
                }
            }
            debug!("invalidation listener stopped");
        })
    }

    async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> Result<(), CacheError> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;

        info!(channel = %self.channel, "subscribed to invalidation channel");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                msg = stream.next() => match msg {
                    Some(msg) => match msg.get_payload::<String>() {
                        Ok(tag) => self.apply(&tag),
                        Err(e) => warn!(error = %e, "malformed invalidation payload"),
                    },
                    None => {
                        return Err(CacheError::RemoteUnavailable(
                            "pub/sub connection closed".to_string(),
                        ));
                    }
                }
            }
        }
    }

    fn apply(&self, tag: &str) {
        let keys = self.tags.take_tag(tag);
        for key in &keys {
            self.memory.remove(key);
        }
        if !keys.is_empty() {
            debug!(tag, purged = keys.len(), "applied remote invalidation");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::config::MemoryConfig;
    use crate::cache::entry::CacheEntry;
    use crate::cache::memory::MemoryLookup;

    use super::*;

    #[test]
    fn test_apply_drops_tagged_entries_locally() {
        let memory = Arc::new(MemoryTier::new(&MemoryConfig::default()));
        let tags = Arc::new(TagIndex::new());
        let listener = InvalidationListener {
            url: "redis://localhost:6379".to_string(),
            channel: "strata:invalidate".to_string(),
            memory: Arc::clone(&memory),
            tags: Arc::clone(&tags),
        };

        tags.register("k1", &["scope:42".into()]);
        memory.insert(
            "k1",
            CacheEntry::new(b"v".to_vec(), vec!["scope:42".into()], Duration::from_secs(60)),
        );
        tags.register("k2", &["scope:7".into()]);
        memory.insert(
            "k2",
            CacheEntry::new(b"v".to_vec(), vec!["scope:7".into()], Duration::from_secs(60)),
        );

        listener.apply("scope:42");

        assert!(matches!(memory.lookup("k1"), MemoryLookup::Miss));
        assert!(matches!(memory.lookup("k2"), MemoryLookup::Hit(_)));
    }
}

/// Publish a tag invalidation so other instances drop their local copies.
pub(crate) async fn publish_invalidation(
    pool: &Pool,
    channel: &str,
    tag: &str,
    timeout: Duration,
) -> Result<(), CacheError> {
    let publish = async {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
        let _: () = conn
            .publish(channel, tag)
            .await
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
        Ok(())
    };
    match tokio::time::timeout(timeout, publish).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::RemoteUnavailable(format!(
            "publish timed out after {timeout:?}"
        ))),
    }
}
