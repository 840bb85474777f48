//! Remote tier - shared TTL-based cache over Redis.

use std::future::Future;
use std::time::Duration;

use deadpool_redis::{Config as PoolBuilder, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::warn;

use crate::config::RemoteSettings;
use crate::error::CacheError;

use super::entry::RemoteEnvelope;

/// Shared cross-process cache tier.
///
/// Every call is bounded by the configured timeout; a timeout or transport
/// error surfaces as `RemoteUnavailable`, which the manager treats as a miss
/// and feeds into its circuit breaker. Eviction is delegated entirely to
/// Redis TTLs; the manager only deletes keys here during tag invalidation.
#[derive(Clone)]
pub(crate) struct RemoteTier {
    pool: Pool,
    url: String,
    timeout: Duration,
}

impl RemoteTier {
    pub fn connect(settings: &RemoteSettings) -> Result<Self, CacheError> {
        let mut config = PoolBuilder::from_url(settings.url.clone());
        config.pool = Some(PoolConfig::new(settings.pool_size));
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
        Ok(Self {
            pool,
            url: settings.url.clone(),
            timeout: settings.timeout,
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Connection URL, needed by the pub/sub listener which cannot use
    /// pooled connections for SUBSCRIBE.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::RemoteUnavailable(format!(
                "{what} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<RemoteEnvelope>, CacheError> {
        self.bounded("GET", async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            let raw: Option<Vec<u8>> = conn
                .get(key)
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            match raw {
                None => Ok(None),
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(envelope) => Ok(Some(envelope)),
                    Err(e) => {
                        warn!(key, error = %e, "remote envelope decode failed, treating as miss");
                        Ok(None)
                    }
                },
            }
        })
        .await
    }

    /// Store an already-serialized envelope with a TTL.
    pub async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = ttl.as_secs().max(1);
        self.bounded("SET", async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            let _: () = conn
                .set_ex(key, payload, ttl_secs)
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.bounded("DEL", async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            let _: () = conn
                .del(keys)
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Health probe used by the manager's degraded-mode detection.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.bounded("PING", async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::RemoteUnavailable(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
