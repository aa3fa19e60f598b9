//! Assertion verifier client
//!
//! Signature validation and claim extraction happen in an external
//! verifier service; the callback handler posts the raw base64 assertion
//! there and gets the flat claims map back. Any non-success response or
//! malformed body rejects the login.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::claims::{IdentityClaims, RawClaims};
use crate::{Error, Result};

/// Exchanges a raw SAML response for verified identity claims.
#[async_trait]
pub trait AssertionVerifier: std::fmt::Debug + Send + Sync {
    /// Verify the assertion and extract its claims.
    async fn verify(&self, saml_response: &str) -> Result<IdentityClaims>;
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "SAMLResponse")]
    saml_response: &'a str,
}

/// HTTP client for the external verifier service. Every request is bounded
/// by the configured timeout; a hung verifier must not stall the login
/// callback.
#[derive(Debug, Clone)]
pub struct RemoteVerifier {
    http: reqwest::Client,
    verifier_url: String,
    timeout: Duration,
}

impl RemoteVerifier {
    /// Create a verifier client for the given endpoint.
    #[must_use]
    pub fn new(verifier_url: String, timeout_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            verifier_url,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl AssertionVerifier for RemoteVerifier {
    async fn verify(&self, saml_response: &str) -> Result<IdentityClaims> {
        if self.verifier_url.is_empty() {
            return Err(Error::Verifier("Verifier URL not configured".to_string()));
        }

        let response = self
            .http
            .post(&self.verifier_url)
            .json(&VerifyRequest { saml_response })
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Verifier(format!(
                "Verifier rejected assertion: HTTP {status} - {body}"
            )));
        }

        let raw: RawClaims = response
            .json()
            .await
            .map_err(|e| Error::Verifier(format!("Malformed verifier response: {e}")))?;

        debug!("Assertion verified");
        Ok(IdentityClaims::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn empty_verifier_url_is_rejected() {
        let verifier = RemoteVerifier::new(String::new(), 500);
        let err = verifier.verify("assertion").await.unwrap_err();
        assert!(matches!(err, Error::Verifier(_)));
    }

    #[tokio::test]
    async fn hung_verifier_is_bounded_by_the_timeout() {
        // accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let _hold = socket;
                    std::future::pending::<()>().await;
                });
            }
        });

        let verifier = RemoteVerifier::new(format!("http://{addr}/verify"), 200);
        let started = Instant::now();
        let result = verifier.verify("assertion").await;
        let elapsed = started.elapsed();

        assert!(result.is_err());
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }
}
