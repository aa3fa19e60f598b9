//! Redis store backend

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::info;

use super::KvStore;
use crate::Result;

/// Redis-backed ephemeral store using a multiplexed async connection.
#[derive(Debug)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Open a client for the given Redis URL (`redis://` or `rediss://`).
    pub fn new(url: &str) -> Result<Self> {
        info!("Using Redis ephemeral store");
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = conn.expire(key, i64::try_from(ttl_secs).unwrap_or(i64::MAX)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = conn.del(key).await?;
        Ok(())
    }
}
