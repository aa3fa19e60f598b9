//! In-memory store backend
//!
//! Used by tests and local development runs without a Redis instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::info;

use super::KvStore;
use crate::Result;

/// In-memory TTL store. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, (String, Instant)>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        info!("Using in-memory ephemeral store");
        Self::default()
    }
}

fn deadline(ttl_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_string(), deadline(ttl_secs)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expiry)) if *expiry > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn expire_in(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some((_, expiry)) = entries.get_mut(key) {
            *expiry = deadline(ttl_secs);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
