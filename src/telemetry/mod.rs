//! Telemetry relay
//!
//! Relays best-effort engagement events to the learning-record store:
//! resolves a stable actor identifier, keeps an OAuth client-credentials
//! token cache, builds enter/exit statements, and sends them with a fixed
//! request timeout, a one-shot 401 retry, and TTL-based dedupe of connect
//! events. Failures never cross the relay boundary; they are captured in
//! the returned outcome.

pub mod actor;
pub mod dedupe;
pub mod oauth;
pub mod statement;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TelemetryConfig;
use crate::claims::IdentityClaims;
use crate::store::KvStore;
use crate::{Error, Result};

use actor::resolve_actor;
use dedupe::DedupeGuard;
use oauth::OAuthTokenCache;
use statement::{build_enter, build_exit, ActivitySource, Agent, Statement, XAPI_VERSION};

/// Session descriptor the caller persists (cookie-backed) between connect
/// and disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySession {
    /// Resolved actor identifier
    pub actor_id: String,
    /// The actor agent, as sent to the LRS
    pub actor: Agent,
    /// Registration UUID tying enter and exit together
    pub session_id: Uuid,
    /// When the connect was emitted
    pub login_at: DateTime<Utc>,
}

/// Optional client-side metadata accompanying a connect request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMeta {
    /// Page the user landed on
    pub page_url: Option<String>,
    /// UI element that triggered the session
    pub button_id: Option<String>,
    /// Client-reported timestamp (millis)
    pub client_ts: Option<i64>,
}

/// Result of a connect emission. Carries session data even when the send
/// failed so the caller can still do disconnect bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ConnectOutcome {
    /// Whether the emission succeeded (skips and duplicates count as
    /// success)
    pub success: bool,
    /// Relay disabled or unconfigured; nothing was sent
    pub skipped: bool,
    /// A recent connect exists for this actor; nothing was sent
    pub duplicate: bool,
    /// Resolved actor identifier, when resolution succeeded
    pub actor_id: Option<String>,
    /// Session descriptor for the caller to persist
    pub session: Option<TelemetrySession>,
    /// Failure detail, when the emission failed
    pub error: Option<String>,
}

impl ConnectOutcome {
    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Self::default()
        }
    }
}

/// Result of a disconnect emission.
#[derive(Debug, Clone, Default)]
pub struct DisconnectOutcome {
    /// Whether the emission succeeded (skips count as success)
    pub success: bool,
    /// Relay disabled or unconfigured; nothing was sent
    pub skipped: bool,
    /// Failure detail, when the emission failed
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Best-effort engagement-event relay to the LRS.
#[derive(Debug)]
pub struct TelemetryRelay {
    config: TelemetryConfig,
    http: reqwest::Client,
    token_cache: OAuthTokenCache,
    dedupe: DedupeGuard,
}

impl TelemetryRelay {
    /// Create a relay over the shared ephemeral store.
    #[must_use]
    pub fn new(config: TelemetryConfig, store: Arc<dyn KvStore>) -> Self {
        let dedupe = DedupeGuard::new(store, config.dedupe_ttl_secs);
        Self {
            config,
            http: reqwest::Client::new(),
            token_cache: OAuthTokenCache::new(),
            dedupe,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn source(&self) -> ActivitySource<'_> {
        ActivitySource {
            activity_id: &self.config.activity_id,
            activity_name: &self.config.activity_name,
            catalog_item_uri: self.config.catalog_item_uri.as_deref(),
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Statement("LRS base URL not configured".to_string()))
    }

    /// Emit an "enter" event for freshly verified claims.
    pub async fn emit_connect(&self, claims: &IdentityClaims, meta: &ConnectMeta) -> ConnectOutcome {
        if !self.config.is_configured() {
            debug!("Telemetry disabled or unconfigured, skipping connect");
            return ConnectOutcome::skipped();
        }

        let Some(descriptor) = resolve_actor(claims) else {
            warn!("Cannot resolve actor identity for connect");
            return ConnectOutcome {
                success: false,
                error: Some("Cannot resolve actor identity".to_string()),
                ..ConnectOutcome::default()
            };
        };
        let actor_id = descriptor.value.clone();
        let agent = Agent::from_descriptor(&descriptor);

        if self.dedupe.is_duplicate(&actor_id).await {
            info!(actor = %actor_id, "Duplicate connect suppressed");
            // No statement is sent, but the actor resolved: hand back a
            // fresh session descriptor so a caller that lost its cookie
            // (new tab, cleared jar) regains disconnect bookkeeping.
            return ConnectOutcome {
                success: true,
                duplicate: true,
                actor_id: Some(actor_id.clone()),
                session: Some(TelemetrySession {
                    actor_id,
                    actor: agent,
                    session_id: Uuid::new_v4(),
                    login_at: Utc::now(),
                }),
                ..ConnectOutcome::default()
            };
        }

        let session_id = Uuid::new_v4();
        let login_at = Utc::now();
        debug!(
            actor = %actor_id,
            session = %session_id,
            page_url = ?meta.page_url,
            button_id = ?meta.button_id,
            "Emitting connect"
        );

        let session = TelemetrySession {
            actor_id: actor_id.clone(),
            actor: agent.clone(),
            session_id,
            login_at,
        };

        let sent = match build_enter(self.source(), agent, session_id) {
            Ok(statement) => self.send_statement(&statement).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                self.dedupe.mark(&actor_id).await;
                ConnectOutcome {
                    success: true,
                    actor_id: Some(actor_id),
                    session: Some(session),
                    ..ConnectOutcome::default()
                }
            }
            Err(e) => {
                error!(actor = %actor_id, error = %e, "Connect emission failed");
                ConnectOutcome {
                    success: false,
                    actor_id: Some(actor_id),
                    session: Some(session),
                    error: Some(e.to_string()),
                    ..ConnectOutcome::default()
                }
            }
        }
    }

    /// Emit an "exit" event for a persisted session. The dedupe marker is
    /// cleared regardless of the send outcome: the user truly has left.
    pub async fn emit_disconnect(&self, session: &TelemetrySession) -> DisconnectOutcome {
        if !self.config.is_configured() {
            debug!("Telemetry disabled or unconfigured, skipping disconnect");
            return DisconnectOutcome {
                success: true,
                skipped: true,
                error: None,
            };
        }

        if session.actor_id.is_empty() || session.actor.account_name().is_empty() {
            warn!("Invalid session data for disconnect");
            return DisconnectOutcome {
                success: false,
                skipped: false,
                error: Some("Invalid session data".to_string()),
            };
        }

        let duration = (Utc::now() - session.login_at).to_std().ok();
        debug!(
            actor = %session.actor_id,
            session = %session.session_id,
            duration = ?duration,
            "Emitting disconnect"
        );

        let sent = match build_exit(
            self.source(),
            session.actor.clone(),
            session.session_id,
            duration,
        ) {
            Ok(statement) => self.send_statement(&statement).await,
            Err(e) => Err(e),
        };

        self.dedupe.clear(&session.actor_id).await;

        match sent {
            Ok(()) => DisconnectOutcome {
                success: true,
                skipped: false,
                error: None,
            },
            Err(e) => {
                error!(actor = %session.actor_id, error = %e, "Disconnect emission failed");
                DisconnectOutcome {
                    success: false,
                    skipped: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// POST a statement with bearer auth. On the first 401 the cached token
    /// is invalidated and the send retried once with a fresh token; a
    /// second 401 is a hard failure.
    async fn send_statement(&self, statement: &Statement) -> Result<()> {
        let url = format!("{}/xAPI/statements", self.base_url()?);
        let mut retried = false;

        loop {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header("X-Experience-API-Version", XAPI_VERSION)
                .json(statement)
                .timeout(self.request_timeout())
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && !retried {
                warn!(statement = %statement.id(), "LRS returned 401, refreshing token and retrying once");
                self.token_cache.invalidate();
                retried = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Statement(format!(
                    "Statement send failed: HTTP {status} - {body}"
                )));
            }

            debug!(
                statement = %statement.id(),
                verb = statement.verb_id(),
                status = %status,
                "Statement accepted"
            );
            return Ok(());
        }
    }

    /// A valid access token, from cache or a fresh client-credentials
    /// request bounded by the fixed timeout.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token_cache.get() {
            return Ok(token);
        }

        let url = format!("{}/auth/oauth/v2/token", self.base_url()?);
        let client_id = self.config.client_id.as_deref().unwrap_or_default();
        let client_secret = self.config.client_secret.as_deref().unwrap_or_default();

        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = self.config.scope.as_deref() {
            params.push(("scope", scope));
        }

        let response = self
            .http
            .post(&url)
            .form(&params)
            .timeout(self.request_timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Statement(format!(
                "OAuth token fetch failed: HTTP {status} - {body}"
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_in = token.expires_in.unwrap_or(3600);
        self.token_cache
            .put(token.access_token.clone(), Duration::from_secs(expires_in));
        info!(expires_in, "OAuth token fetched");

        Ok(token.access_token)
    }
}
