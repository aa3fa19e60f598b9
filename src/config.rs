//! Configuration management

use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier. Files that don't
    /// exist are silently skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Ephemeral store configuration
    pub store: StoreConfig,
    /// Opaque token configuration
    pub token: TokenConfig,
    /// Identity provider endpoints
    pub idp: IdpConfig,
    /// Site redirect targets
    pub redirects: RedirectConfig,
    /// Permission directory configuration
    pub directory: DirectoryConfig,
    /// Telemetry relay configuration
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Origins allowed to call the verify/connect endpoints
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

/// Ephemeral store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL (`redis://` or `rediss://`); empty selects the in-memory
    /// backend (development only)
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Opaque token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

/// Identity provider endpoints (the SAML exchange itself is handled by the
/// external assertion verifier)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    /// Where to send the user to authenticate
    pub login_url: String,
    /// Where to send the user on logout
    pub logout_url: String,
    /// Assertion verifier endpoint; the callback posts the raw assertion
    /// here and receives the claims map
    pub verifier_url: String,
    /// Client-side deadline for verifier requests in milliseconds
    pub verifier_timeout_ms: u64,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            logout_url: String::new(),
            verifier_url: String::new(),
            verifier_timeout_ms: 5000,
        }
    }
}

/// Site redirect targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Default site origin when no referer is known
    pub default_site: String,
    /// Alternate site origin selected by the `rf=space` query flag
    pub space_site: String,
    /// Safe generic landing page for licensed users
    pub success_url: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            default_site: String::new(),
            space_site: String::new(),
            success_url: "/training-materials".to_string(),
        }
    }
}

/// Permission directory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Path to the JSON directory file with `permissions` and `subjects`
    pub path: Option<String>,
}

/// Telemetry relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Master switch; off until the LRS credentials are provisioned
    pub enabled: bool,
    /// LRS base URL
    pub base_url: Option<String>,
    /// OAuth client id for the client-credentials grant
    pub client_id: Option<String>,
    /// OAuth client secret
    pub client_secret: Option<String>,
    /// OAuth scope, included only when set
    pub scope: Option<String>,
    /// IRI identifying this platform in statements
    pub activity_id: String,
    /// Display name of this platform in statements
    pub activity_name: String,
    /// Catalog item IRI; required to build any statement
    pub catalog_item_uri: Option<String>,
    /// Dedupe marker lifetime in seconds
    pub dedupe_ttl_secs: u64,
    /// Client-side deadline for LRS requests in milliseconds
    pub request_timeout_ms: u64,
    /// Secret for signing the session cookie (>= 32 bytes)
    pub cookie_secret: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            client_id: None,
            client_secret: None,
            scope: None,
            activity_id: String::new(),
            activity_name: "LMS".to_string(),
            catalog_item_uri: None,
            dedupe_ttl_secs: 300,
            request_timeout_ms: 2000,
            cookie_secret: None,
        }
    }
}

impl TelemetryConfig {
    /// Whether the relay can actually send: enabled with connectivity
    /// settings present. Anything else means "feature disabled".
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.enabled && self.base_url.is_some() && self.client_id.is_some()
    }
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `BROKER_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("BROKER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                    Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }
}
