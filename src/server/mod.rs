//! Broker server
//!
//! Wires the store, directory, verifier, and relay into the HTTP surface
//! and runs it with graceful shutdown.

pub mod router;
pub mod verifier;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::directory::FileDirectory;
use crate::permission::PermissionEngine;
use crate::store::{KvStore, MemoryStore, RedisStore};
use crate::telemetry::TelemetryRelay;
use crate::token::TokenBroker;
use crate::{Error, Result};

use router::{create_router, AppState};
use verifier::RemoteVerifier;

/// The assembled broker, ready to serve.
pub struct Broker {
    config: Config,
    state: Arc<AppState>,
}

impl Broker {
    /// Assemble the broker from configuration.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn KvStore> = if config.store.url.is_empty() {
            warn!("No store URL configured, using in-memory store (development only)");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RedisStore::new(&config.store.url)?)
        };

        let directory = match config.directory.path.as_deref() {
            Some(path) => FileDirectory::load(Path::new(path))?,
            None => {
                warn!("No permission directory configured, all license checks will deny");
                FileDirectory::from_records(Vec::new(), Vec::new())
            }
        };

        let broker = TokenBroker::new(Arc::clone(&store), config.token.ttl_secs);
        let engine = PermissionEngine::new(
            Arc::new(directory),
            config.redirects.success_url.clone(),
        );
        let relay = Arc::new(TelemetryRelay::new(
            config.telemetry.clone(),
            Arc::clone(&store),
        ));
        let verifier = Arc::new(RemoteVerifier::new(
            config.idp.verifier_url.clone(),
            config.idp.verifier_timeout_ms,
        ));
        let cookie_key = cookie_key(config.telemetry.cookie_secret.as_deref());

        let state = Arc::new(AppState {
            config: config.clone(),
            broker,
            engine,
            relay,
            verifier,
            cookie_key,
        });

        Ok(Self { config, state })
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "Broker listening");

        let app = create_router(self.state);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Broker stopped");
        Ok(())
    }
}

/// Cookie signing key: derived from the configured secret, or a fresh
/// random key when the secret is missing or too short. A random key means
/// session cookies do not survive a restart.
fn cookie_key(secret: Option<&str>) -> Key {
    match secret {
        Some(s) if s.len() >= 32 => Key::derive_from(s.as_bytes()),
        Some(_) => {
            warn!("Cookie secret shorter than 32 bytes, using a random key");
            Key::generate()
        }
        None => {
            warn!("No cookie secret configured, using a random key");
            Key::generate()
        }
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
