//! HTTP router and handlers
//!
//! The broker's outward surface: the login redirect chain, the token
//! verify/license endpoints the site backend calls, and the telemetry
//! connect/disconnect pair. Telemetry failures never surface as HTTP
//! errors; the login flow must not depend on the LRS being up.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRef, Query, State},
    http::{header::HeaderValue, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::permission::{AccessDecision, PermissionEngine};
use crate::telemetry::{ConnectMeta, TelemetryRelay, TelemetrySession};
use crate::token::TokenBroker;
use crate::Error;

use super::verifier::AssertionVerifier;

const SESSION_COOKIE: &str = "lrs_session";
const SESSION_COOKIE_MAX_AGE: time::Duration = time::Duration::hours(24);

/// Shared application state
pub struct AppState {
    /// Loaded configuration
    pub config: Config,
    /// Opaque token broker
    pub broker: TokenBroker,
    /// Permission resolution engine
    pub engine: PermissionEngine,
    /// Telemetry relay
    pub relay: Arc<TelemetryRelay>,
    /// Assertion verifier client
    pub verifier: Arc<dyn AssertionVerifier>,
    /// Key for the signed session cookie
    pub cookie_key: Key,
}

/// Local wrapper for the cookie key so the signed jar can extract it from
/// `Arc<AppState>` without an orphan impl on the foreign `Key` type.
#[derive(Clone)]
pub struct BrokerKey(Key);

impl FromRef<Arc<AppState>> for BrokerKey {
    fn from_ref(state: &Arc<AppState>) -> Self {
        BrokerKey(state.cookie_key.clone())
    }
}

impl From<BrokerKey> for Key {
    fn from(key: BrokerKey) -> Self {
        key.0
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", get(login_handler))
        .route("/login/callback", post(callback_handler))
        .route("/login/verify", get(verify_handler))
        .route("/login/license", get(license_handler))
        .route("/login/fail", get(login_fail_handler))
        .route("/lrs/connect", post(connect_handler))
        .route("/logout", get(logout_handler))
        .route("/no-license-logout", get(no_license_logout_handler))
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Invalid CORS origin, skipped");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// First `X-Forwarded-For` hop when present, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Session cookie for cross-site delivery. `/lrs/connect` is called from
/// the site platform's origin with credentials, and browsers drop any
/// cookie from a cross-site response that is not `SameSite=None; Secure`.
fn session_cookie(payload: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, payload))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(SESSION_COOKIE_MAX_AGE)
        .build()
}

/// The site the login started from: the `Referer` header when sent, else
/// the configured origin selected by the `rf` query flag.
fn origin_site(headers: &HeaderMap, rf: Option<&str>, config: &Config) -> String {
    if let Some(referer) = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return referer.to_string();
    }
    if rf == Some("space") {
        config.redirects.space_site.clone()
    } else {
        config.redirects.default_site.clone()
    }
}

// ── handlers ─────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    rf: Option<String>,
}

/// GET /login - record where the user came from, then bounce to the IdP.
async fn login_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Redirect {
    let ip = client_ip(&headers, peer);
    let site = origin_site(&headers, query.rf.as_deref(), &state.config);

    debug!(ip = %ip, site = %site, "Login started");
    if let Err(e) = state.broker.remember_referer(&ip, &site).await {
        error!(error = %e, "Failed to record login origin");
        return Redirect::to("/login/fail");
    }

    Redirect::to(&state.config.idp.login_url)
}

#[derive(Debug, Deserialize)]
struct CallbackForm {
    #[serde(rename = "SAMLResponse")]
    saml_response: String,
}

/// POST /login/callback - verify the assertion, mint a token, and hand the
/// user back to the originating site with the token in the URL.
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<CallbackForm>,
) -> Redirect {
    let ip = client_ip(&headers, peer);

    let claims = match state.verifier.verify(&form.saml_response).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(ip = %ip, error = %e, "Assertion verification failed");
            return Redirect::to("/login/fail");
        }
    };

    let token = match state.broker.issue(&claims).await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Token issuance failed");
            return Redirect::to("/login/fail");
        }
    };

    let site = match state.broker.take_referer(&ip).await {
        Ok(Some(site)) => site,
        Ok(None) => state.config.redirects.default_site.clone(),
        Err(e) => {
            warn!(error = %e, "Referer lookup failed, using default site");
            state.config.redirects.default_site.clone()
        }
    };
    state.broker.invalidate_referer(&ip).await;

    info!(name = %claims.display_name, site = %site, "Login completed");
    Redirect::to(&format!(
        "{}/createsession?token={token}",
        site.trim_end_matches('/')
    ))
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    token: Option<String>,
    subject: Option<String>,
    url: Option<String>,
}

/// GET /login/verify - exchange a token for its claims. Read-many within
/// the TTL window. An optional `subject` narrows the access check; when
/// only a page `url` is sent, the subject is inferred from the registered
/// routes.
async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing token"})),
        )
            .into_response();
    };

    let claims = match state.broker.verify(&token).await {
        Ok(claims) => claims,
        Err(Error::TokenNotFound) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Token not found or expired"})),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Token verification failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Verification failed"})),
            )
                .into_response();
        }
    };

    let subject = match (query.subject, query.url) {
        (Some(subject), _) => Some(subject),
        (None, Some(url)) => match state.engine.subject_for_url(&url).await {
            Ok(subject) => subject,
            Err(e) => {
                error!(error = %e, "Route lookup failed");
                None
            }
        },
        (None, None) => None,
    };

    if let Some(subject) = subject.as_deref() {
        match state.engine.verify_access(&claims, Some(subject)).await {
            Ok(AccessDecision::Allowed) => {}
            Ok(AccessDecision::Denied) => {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({"error": "Access denied"})),
                )
                    .into_response();
            }
            Err(e) => {
                error!(error = %e, "Access check failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Verification failed"})),
                )
                    .into_response();
            }
        }
    }

    Json(claims).into_response()
}

#[derive(Debug, Deserialize)]
struct LicenseQuery {
    token: Option<String>,
}

/// GET /login/license - license decision plus the redirect target for a
/// verified token.
async fn license_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LicenseQuery>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing token"})),
        )
            .into_response();
    };

    let claims = match state.broker.verify(&token).await {
        Ok(claims) => claims,
        Err(Error::TokenNotFound) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Token not found or expired"})),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Token verification failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Verification failed"})),
            )
                .into_response();
        }
    };

    let licensed = match state.engine.has_license(&claims).await {
        Ok(licensed) => licensed,
        Err(e) => {
            error!(error = %e, "License check failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "License check failed"})),
            )
                .into_response();
        }
    };

    let redirect_url = if licensed {
        match state.engine.resolve_redirect(&claims).await {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Redirect resolution failed");
                state.config.redirects.success_url.clone()
            }
        }
    } else {
        String::new()
    };

    Json(json!({
        "licensed": licensed,
        "redirectUrl": redirect_url,
    }))
    .into_response()
}

/// GET /login/fail - terminal page for a failed login.
async fn login_fail_handler() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Login failed"})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    token: Option<String>,
    page_url: Option<String>,
    button_id: Option<String>,
    client_ts: Option<i64>,
}

/// POST /lrs/connect - emit the session-start event and set the signed
/// session cookie. The handler answers 200 even when the LRS send fails.
async fn connect_handler(
    State(state): State<Arc<AppState>>,
    jar: SignedCookieJar<BrokerKey>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let Some(token) = request.token.filter(|t| !t.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "Missing token"})),
        )
            .into_response();
    };

    let claims = match state.broker.verify(&token).await {
        Ok(claims) => claims,
        Err(Error::TokenNotFound) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "error": "Token not found or expired"})),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Token verification failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": "Verification failed"})),
            )
                .into_response();
        }
    };

    let meta = ConnectMeta {
        page_url: request.page_url,
        button_id: request.button_id,
        client_ts: request.client_ts,
    };
    let outcome = state.relay.emit_connect(&claims, &meta).await;

    let jar = match &outcome.session {
        Some(session) => match serde_json::to_string(session) {
            Ok(payload) => jar.add(session_cookie(payload)),
            Err(e) => {
                error!(error = %e, "Failed to serialize session cookie");
                jar
            }
        },
        None => jar,
    };

    let body = if outcome.success {
        json!({
            "ok": true,
            "skipped": outcome.skipped,
            "duplicate": outcome.duplicate,
            "sessionId": outcome.session.as_ref().map(|s| s.session_id),
        })
    } else {
        json!({
            "ok": true,
            "warning": outcome.error,
            "sessionId": outcome.session.as_ref().map(|s| s.session_id),
        })
    };

    (jar, Json(body)).into_response()
}

/// GET /logout - fire the session-end event in the background, drop the
/// session cookie, and bounce to the IdP logout endpoint. The redirect
/// never waits for the LRS.
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: SignedCookieJar<BrokerKey>,
    headers: HeaderMap,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        match serde_json::from_str::<TelemetrySession>(cookie.value()) {
            Ok(session) => {
                let relay = Arc::clone(&state.relay);
                tokio::spawn(async move {
                    relay.emit_disconnect(&session).await;
                });
            }
            Err(e) => warn!(error = %e, "Unreadable session cookie, skipping disconnect"),
        }
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));

    let site = origin_site(&headers, None, &state.config);
    let target = format!("{}?logoutURL={site}", state.config.idp.logout_url);
    (jar, Redirect::to(&target)).into_response()
}

/// GET /no-license-logout - logout variant that lands the user on the
/// site's no-license page instead of its home page.
async fn no_license_logout_handler(
    State(state): State<Arc<AppState>>,
    jar: SignedCookieJar<BrokerKey>,
    headers: HeaderMap,
) -> Response {
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));

    let site = origin_site(&headers, None, &state.config);
    let target = format!(
        "{}?logoutURL={}/no-license/",
        state.config.idp.logout_url,
        site.trim_end_matches('/')
    );
    (jar, Redirect::to(&target)).into_response()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.redirects.default_site = "https://site.example".to_string();
        config.redirects.space_site = "https://space.example".to_string();
        config
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let peer: SocketAddr = "10.0.0.9:4242".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, peer), "203.0.113.7");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "10.0.0.9:4242".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), peer), "10.0.0.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(client_ip(&headers, peer), "10.0.0.9");
    }

    #[test]
    fn origin_site_prefers_referer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::REFERER,
            HeaderValue::from_static("https://other.example/page"),
        );
        assert_eq!(
            origin_site(&headers, Some("space"), &config()),
            "https://other.example/page"
        );
    }

    #[test]
    fn origin_site_rf_flag_selects_space_site() {
        let headers = HeaderMap::new();
        assert_eq!(
            origin_site(&headers, Some("space"), &config()),
            "https://space.example"
        );
        assert_eq!(
            origin_site(&headers, None, &config()),
            "https://site.example"
        );
        assert_eq!(
            origin_site(&headers, Some("other"), &config()),
            "https://site.example"
        );
    }

    #[test]
    fn session_cookie_is_deliverable_cross_site() {
        let cookie = session_cookie("payload".to_string());
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(SESSION_COOKIE_MAX_AGE));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn cors_layer_skips_invalid_origins() {
        // must not panic on garbage
        let _ = cors_layer(&["https://ok.example".to_string(), "\u{7f}bad".to_string()]);
    }
}
