//! Redis list-backed queue store.
//!
//! - **push**: `LPUSH` (head)
//! - **pop**: `BRPOP` across all live queues (tail, blocking with timeout)
//! - **depth**: `LLEN`
//!
//! `BRPOP` parks the connection it runs on until it returns, so commands are
//! issued over a connection pool: each concurrent blocking pop checks out its
//! own connection and pushes/length queries never wait behind it.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use tracing::instrument;

use super::{QueueError, QueueStore};

/// Default Redis URL when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Connections kept beyond one per dispatcher (pushes, depth reporter, `/dlq`).
const POOL_HEADROOM: usize = 4;

#[derive(Debug, Clone)]
pub struct RedisQueueStoreConfig {
    pub url: String,
    pub pool_size: usize,
}

impl RedisQueueStoreConfig {
    /// Pool sized so every dispatcher can hold a blocking pop at once.
    pub fn for_dispatchers(url: impl Into<String>, concurrency: usize) -> Self {
        Self {
            url: url.into(),
            pool_size: concurrency + POOL_HEADROOM,
        }
    }
}

impl Default for RedisQueueStoreConfig {
    fn default() -> Self {
        Self::for_dispatchers(DEFAULT_REDIS_URL, 3)
    }
}

pub struct RedisQueueStore {
    pool: Pool,
}

impl RedisQueueStore {
    /// Create the pool. No connection is opened until first use; call
    /// [`QueueStore::ping`] to verify connectivity.
    pub fn new(config: &RedisQueueStoreConfig) -> Result<Self, QueueError> {
        let mut cfg = Config::from_url(config.url.clone());
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Pool(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, QueueError> {
        if self.pool.is_closed() {
            return Err(QueueError::Closed);
        }
        self.pool
            .get()
            .await
            .map_err(|e| QueueError::Pool(e.to_string()))
    }
}

impl std::fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisQueueStore")
            .field("pool_size", &status.size)
            .field("pool_max", &status.max_size)
            .finish()
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    #[instrument(skip(self, item), err)]
    async fn push_head(&self, queue: &str, item: &str) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(item)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("LPUSH failed: {}", e)))?;
        Ok(())
    }

    async fn blocking_pop_tail(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, QueueError> {
        if queues.is_empty() {
            return Ok(None);
        }

        let mut conn = self.conn().await?;
        // BRPOP key [key ...] timeout; nil reply on timeout.
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queues)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("BRPOP failed: {}", e)))?;

        Ok(popped)
    }

    async fn length(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;
        let len: u64 = redis::cmd("LLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("LLEN failed: {}", e)))?;
        Ok(len)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("PING failed: {}", e)))?;
        Ok(())
    }

    /// Outstanding connections are dropped when they return to the pool.
    fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_leaves_headroom_beyond_dispatchers() {
        let config = RedisQueueStoreConfig::for_dispatchers("redis://cache:6379", 8);
        assert_eq!(config.pool_size, 12);
        assert_eq!(config.url, "redis://cache:6379");
    }

    #[tokio::test]
    async fn building_the_pool_does_not_connect() {
        let store = RedisQueueStore::new(&RedisQueueStoreConfig::default()).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("pool_max"));
    }
}
