//! Token broker
//!
//! Issues and verifies opaque, short-lived tokens carrying serialized
//! identity claims. The token rides a post-login redirect URL; the site
//! backend exchanges it back for the claims. The store enforces expiry, not
//! the broker, and `verify` is read-many within the TTL window.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::claims::IdentityClaims;
use crate::store::KvStore;
use crate::{Error, Result};

const TOKEN_PREFIX: &str = "TOKEN:";
const REFERER_PREFIX: &str = "REFERER:";

/// Referer records live for a day so a token can be minted for a login
/// started much earlier.
const REFERER_TTL_SECS: u64 = 24 * 60 * 60;

/// TTL the referer record is shortened to once a token has been issued.
/// A weak single-use signal, not a hard guarantee.
const REFERER_INVALIDATED_TTL_SECS: u64 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RefererRecord {
    referer: String,
}

/// Issues and verifies opaque handoff tokens.
#[derive(Debug, Clone)]
pub struct TokenBroker {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl TokenBroker {
    /// Create a broker over the shared ephemeral store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Mint a token for verified claims. One store write; a store failure
    /// here is fatal for the login request.
    pub async fn issue(&self, claims: &IdentityClaims) -> Result<String> {
        let id = generate_token_id();
        let payload = serde_json::to_string(claims)?;
        self.store
            .set_ex(&format!("{TOKEN_PREFIX}{id}"), &payload, self.ttl_secs)
            .await?;
        debug!(ttl_secs = self.ttl_secs, "Issued handoff token");
        Ok(id)
    }

    /// Exchange a token for its claims. Single read, no delete-on-read: the
    /// verify endpoint may legitimately be called more than once within the
    /// TTL window.
    pub async fn verify(&self, token_id: &str) -> Result<IdentityClaims> {
        let raw = self.store.get(&format!("{TOKEN_PREFIX}{token_id}")).await?;
        match raw {
            Some(payload) => Ok(serde_json::from_str(&payload)?),
            None => Err(Error::TokenNotFound),
        }
    }

    /// Remember which site sent this client to the identity provider.
    pub async fn remember_referer(&self, client_ip: &str, referer: &str) -> Result<()> {
        let record = serde_json::to_string(&RefererRecord {
            referer: referer.to_string(),
        })?;
        self.store
            .set_ex(&format!("{REFERER_PREFIX}{client_ip}"), &record, REFERER_TTL_SECS)
            .await
    }

    /// Look up the referer recorded for this client, if any.
    pub async fn take_referer(&self, client_ip: &str) -> Result<Option<String>> {
        let raw = self.store.get(&format!("{REFERER_PREFIX}{client_ip}")).await?;
        match raw {
            Some(payload) => {
                let record: RefererRecord = serde_json::from_str(&payload)?;
                Ok(Some(record.referer))
            }
            None => Ok(None),
        }
    }

    /// Shorten the referer record to a one-second TTL after token issuance.
    /// Best-effort; a failure is logged, not rolled back.
    pub async fn invalidate_referer(&self, client_ip: &str) {
        let key = format!("{REFERER_PREFIX}{client_ip}");
        if let Err(e) = self.store.expire_in(&key, REFERER_INVALIDATED_TTL_SECS).await {
            warn!(error = %e, "Failed to invalidate referer record");
        }
    }
}

/// Generate a random token identifier (16 bytes, base64url).
fn generate_token_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;

    fn claims() -> IdentityClaims {
        IdentityClaims {
            display_name: "Dana".to_string(),
            subject_id: "123456789".to_string(),
            organizations: vec!["100".to_string()],
            is_student: false,
            group_label: None,
            identifiers: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn token_ids_are_unique_and_url_safe() {
        let a = generate_token_id();
        let b = generate_token_id();
        assert_ne!(a, b);
        assert!(!a.contains('+'));
        assert!(!a.contains('/'));
        assert!(!a.contains('='));
        // 16 random bytes -> 22 base64url chars
        assert_eq!(a.len(), 22);
    }

    #[tokio::test]
    async fn verify_is_idempotent_within_ttl() {
        let broker = TokenBroker::new(Arc::new(MemoryStore::new()), 60);
        let token = broker.issue(&claims()).await.unwrap();

        let first = broker.verify(&token).await.unwrap();
        let second = broker.verify(&token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, claims());
    }

    #[tokio::test]
    async fn verify_after_expiry_is_not_found() {
        let broker = TokenBroker::new(Arc::new(MemoryStore::new()), 1);
        let token = broker.issue(&claims()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert!(matches!(
            broker.verify(&token).await,
            Err(Error::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let broker = TokenBroker::new(Arc::new(MemoryStore::new()), 60);
        assert!(matches!(
            broker.verify("no-such-token").await,
            Err(Error::TokenNotFound)
        ));
    }

    #[tokio::test]
    async fn referer_round_trip_and_invalidation() {
        let broker = TokenBroker::new(Arc::new(MemoryStore::new()), 60);
        broker
            .remember_referer("10.0.0.1", "https://example.org/")
            .await
            .unwrap();
        assert_eq!(
            broker.take_referer("10.0.0.1").await.unwrap(),
            Some("https://example.org/".to_string())
        );

        broker.invalidate_referer("10.0.0.1").await;
        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(broker.take_referer("10.0.0.1").await.unwrap(), None);
    }
}
