//! Connect-event dedupe guard
//!
//! A short-TTL marker per actor suppresses duplicate "enter" statements.
//! Checks fail open: when the store is unreachable the send is allowed.
//! Marker writes and clears are best-effort.

use std::sync::Arc;

use tracing::warn;

use crate::store::KvStore;

const DEDUPE_PREFIX: &str = "LRS:DEDUPE:";

/// TTL-based duplicate-connect suppression.
#[derive(Debug, Clone)]
pub struct DedupeGuard {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl DedupeGuard {
    /// Create a guard over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Whether a recent connect exists for this actor. Store errors are
    /// logged and treated as "not duplicate".
    pub async fn is_duplicate(&self, actor_id: &str) -> bool {
        match self.store.get(&format!("{DEDUPE_PREFIX}{actor_id}")).await {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                warn!(error = %e, "Dedupe check failed, allowing send");
                false
            }
        }
    }

    /// Set the marker after a successful send.
    pub async fn mark(&self, actor_id: &str) {
        let key = format!("{DEDUPE_PREFIX}{actor_id}");
        if let Err(e) = self.store.set_ex(&key, "1", self.ttl_secs).await {
            warn!(error = %e, "Failed to set dedupe marker");
        }
    }

    /// Clear the marker on disconnect.
    pub async fn clear(&self, actor_id: &str) {
        let key = format!("{DEDUPE_PREFIX}{actor_id}");
        if let Err(e) = self.store.delete(&key).await {
            warn!(error = %e, "Failed to clear dedupe marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn marker_lifecycle() {
        let guard = DedupeGuard::new(Arc::new(MemoryStore::new()), 60);

        assert!(!guard.is_duplicate("actor").await);
        guard.mark("actor").await;
        assert!(guard.is_duplicate("actor").await);
        guard.clear("actor").await;
        assert!(!guard.is_duplicate("actor").await);
    }

    #[tokio::test]
    async fn marker_expires_with_ttl() {
        let guard = DedupeGuard::new(Arc::new(MemoryStore::new()), 1);

        guard.mark("actor").await;
        assert!(guard.is_duplicate("actor").await);

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert!(!guard.is_duplicate("actor").await);
    }

    #[tokio::test]
    async fn markers_are_per_actor() {
        let guard = DedupeGuard::new(Arc::new(MemoryStore::new()), 60);
        guard.mark("a").await;
        assert!(guard.is_duplicate("a").await);
        assert!(!guard.is_duplicate("b").await);
    }
}
