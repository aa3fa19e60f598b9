//! Relay integration tests against a local mock learning-record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use handoff_broker::claims::IdentityClaims;
use handoff_broker::config::TelemetryConfig;
use handoff_broker::store::MemoryStore;
use handoff_broker::telemetry::{ConnectMeta, TelemetryRelay};

#[derive(Default)]
struct LrsState {
    token_requests: AtomicUsize,
    statement_requests: AtomicUsize,
    statement_status: AtomicU16,
    statement_delay_ms: AtomicU64,
}

async fn token_handler(State(state): State<Arc<LrsState>>) -> Json<Value> {
    let n = state.token_requests.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": format!("tok-{n}"),
        "expires_in": 3600,
    }))
}

async fn statement_handler(
    State(state): State<Arc<LrsState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    state.statement_requests.fetch_add(1, Ordering::SeqCst);

    let delay = state.statement_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if headers.get("x-experience-api-version").is_none() {
        return StatusCode::BAD_REQUEST;
    }
    if body.get("actor").is_none() || body.get("verb").is_none() {
        return StatusCode::BAD_REQUEST;
    }

    StatusCode::from_u16(state.statement_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::OK)
}

async fn spawn_lrs(state: Arc<LrsState>) -> String {
    state.statement_status.store(200, Ordering::SeqCst);

    let app = Router::new()
        .route("/auth/oauth/v2/token", post(token_handler))
        .route("/xAPI/statements", post(statement_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn telemetry_config(base_url: &str) -> TelemetryConfig {
    TelemetryConfig {
        enabled: true,
        base_url: Some(base_url.to_string()),
        client_id: Some("client".to_string()),
        client_secret: Some("secret".to_string()),
        activity_id: "https://platform.example".to_string(),
        activity_name: "Platform".to_string(),
        catalog_item_uri: Some("https://catalog.example/item/1".to_string()),
        dedupe_ttl_secs: 60,
        request_timeout_ms: 500,
        ..TelemetryConfig::default()
    }
}

fn claims() -> IdentityClaims {
    IdentityClaims {
        display_name: "Dana".to_string(),
        subject_id: "123456789".to_string(),
        organizations: vec!["100".to_string()],
        is_student: false,
        group_label: None,
        identifiers: BTreeMap::new(),
    }
}

#[tokio::test]
async fn connect_dedupe_and_disconnect_lifecycle() {
    let lrs = Arc::new(LrsState::default());
    let base_url = spawn_lrs(Arc::clone(&lrs)).await;
    let relay = TelemetryRelay::new(telemetry_config(&base_url), Arc::new(MemoryStore::new()));

    // first connect sends and marks the actor
    let first = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    assert!(first.success);
    assert!(!first.duplicate);
    let session = first.session.expect("session after successful connect");

    // second connect is suppressed but still refreshes the session data,
    // so a caller that lost its cookie regains disconnect bookkeeping
    let second = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    assert!(second.success);
    assert!(second.duplicate);
    let refreshed = second.session.expect("session refresh on duplicate");
    assert_eq!(refreshed.actor_id, session.actor_id);
    assert_ne!(refreshed.session_id, session.session_id);
    assert_eq!(lrs.statement_requests.load(Ordering::SeqCst), 1);

    // disconnect sends the exit and clears the marker
    let disconnect = relay.emit_disconnect(&session).await;
    assert!(disconnect.success);
    assert_eq!(lrs.statement_requests.load(Ordering::SeqCst), 2);

    // third connect sends again
    let third = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    assert!(third.success);
    assert!(!third.duplicate);
    assert_eq!(lrs.statement_requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unauthorized_send_retries_once_then_fails() {
    let lrs = Arc::new(LrsState::default());
    let base_url = spawn_lrs(Arc::clone(&lrs)).await;
    lrs.statement_status.store(401, Ordering::SeqCst);

    let relay = TelemetryRelay::new(telemetry_config(&base_url), Arc::new(MemoryStore::new()));
    let outcome = relay.emit_connect(&claims(), &ConnectMeta::default()).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("401"));
    // session data still comes back for disconnect bookkeeping
    assert!(outcome.session.is_some());

    // exactly one retry: two statement posts, two token fetches
    assert_eq!(lrs.statement_requests.load(Ordering::SeqCst), 2);
    assert_eq!(lrs.token_requests.load(Ordering::SeqCst), 2);

    // the failed connect left no dedupe marker, the next one sends again
    let next = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    assert!(!next.duplicate);
}

#[tokio::test]
async fn slow_lrs_is_bounded_by_the_request_timeout() {
    let lrs = Arc::new(LrsState::default());
    let base_url = spawn_lrs(Arc::clone(&lrs)).await;
    lrs.statement_delay_ms.store(5_000, Ordering::SeqCst);

    let relay = TelemetryRelay::new(telemetry_config(&base_url), Arc::new(MemoryStore::new()));

    let started = Instant::now();
    let outcome = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    let elapsed = started.elapsed();

    assert!(!outcome.success);
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

#[tokio::test]
async fn oauth_token_is_reused_across_sends() {
    let lrs = Arc::new(LrsState::default());
    let base_url = spawn_lrs(Arc::clone(&lrs)).await;
    let relay = TelemetryRelay::new(telemetry_config(&base_url), Arc::new(MemoryStore::new()));

    let first = relay.emit_connect(&claims(), &ConnectMeta::default()).await;
    let session = first.session.unwrap();
    relay.emit_disconnect(&session).await;

    assert_eq!(lrs.statement_requests.load(Ordering::SeqCst), 2);
    assert_eq!(lrs.token_requests.load(Ordering::SeqCst), 1);
}
