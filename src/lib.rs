//! Handoff Broker Library
//!
//! Identity handoff between a SAML identity provider and a hosted site
//! platform that cannot speak SAML itself. The broker verifies assertions
//! through an external verifier, mints short-lived opaque tokens the site
//! backend exchanges for claims, resolves license and redirect decisions
//! from organization-scoped permission records, and relays best-effort
//! engagement telemetry to a learning-record store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod permission;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
