//! OAuth client-credentials token cache
//!
//! One process-wide slot shared across all statement sends. Concurrent
//! requests may race to refresh it; both refreshes yield valid tokens and
//! the last write wins, so no lock is held across the network call.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Tokens are considered stale this long before their actual expiry.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Shared access-token slot with early-expiry semantics.
#[derive(Debug, Default)]
pub struct OAuthTokenCache {
    slot: RwLock<Option<CachedToken>>,
}

impl OAuthTokenCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached token, or `None` when absent or within the expiry buffer.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        let slot = self.slot.read();
        slot.as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.access_token.clone())
    }

    /// Cache a freshly fetched token. The expiry buffer is applied here.
    pub fn put(&self, access_token: String, expires_in: Duration) {
        let expires_at = Instant::now() + expires_in.saturating_sub(EXPIRY_BUFFER);
        *self.slot.write() = Some(CachedToken {
            access_token,
            expires_at,
        });
    }

    /// Drop the cached token (after a 401 from the LRS).
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_yields_none() {
        assert_eq!(OAuthTokenCache::new().get(), None);
    }

    #[test]
    fn fresh_token_is_returned() {
        let cache = OAuthTokenCache::new();
        cache.put("tok".to_string(), Duration::from_secs(3600));
        assert_eq!(cache.get(), Some("tok".to_string()));
    }

    #[test]
    fn token_within_buffer_is_treated_as_stale() {
        let cache = OAuthTokenCache::new();
        // expires in 30s, inside the 60s buffer
        cache.put("tok".to_string(), Duration::from_secs(30));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn invalidate_clears_the_slot() {
        let cache = OAuthTokenCache::new();
        cache.put("tok".to_string(), Duration::from_secs(3600));
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn put_overwrites_previous_token() {
        let cache = OAuthTokenCache::new();
        cache.put("old".to_string(), Duration::from_secs(3600));
        cache.put("new".to_string(), Duration::from_secs(3600));
        assert_eq!(cache.get(), Some("new".to_string()));
    }
}
