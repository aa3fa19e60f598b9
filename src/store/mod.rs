//! Ephemeral TTL key-value store
//!
//! Single shared store backing three independent keyspaces: opaque tokens,
//! referer-by-client-IP records, and telemetry dedupe markers. Expiry is
//! enforced by the store, not by the callers.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::Result;

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// TTL-capable key-value store.
///
/// No transaction spans multiple keys; each key is only contended across
/// independent user sessions.
#[async_trait]
pub trait KvStore: Debug + Send + Sync {
    /// Store a value under `key` with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Retrieve the value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Rewrite the TTL of an existing key. Missing keys are a no-op.
    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()>;

    /// Delete `key` if present.
    async fn delete(&self, key: &str) -> Result<()>;
}
