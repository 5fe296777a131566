//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `env:VAR` resolution.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token verification configuration
    pub auth: AuthConfig,
    /// Upstream management API configuration
    pub management: ManagementConfig,
    /// Admission controls (rate limiting, origin allow-list)
    pub admission: AdmissionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Token verification configuration.
///
/// The gateway is a resource server: it verifies tokens minted by the
/// external identity provider at `issuer` and addressed to `audience`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL, e.g. `https://tenant.example.auth0.com/`.
    /// Tokens whose `iss` claim differs exactly are rejected.
    pub issuer: String,
    /// Expected audience (the API identifier this gateway protects)
    pub audience: String,
    /// Allowed signing algorithms. Asymmetric only; `none` and HMAC
    /// algorithms are always rejected.
    pub algorithms: Vec<String>,
    /// JWKS endpoint override. Defaults to
    /// `{issuer}/.well-known/jwks.json`.
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// How long fetched signing keys stay fresh
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Clock skew tolerance applied to the issued-at lower bound
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            algorithms: vec!["RS256".to_string()],
            jwks_uri: None,
            jwks_ttl: Duration::from_secs(3600),
            leeway: Duration::from_secs(60),
        }
    }
}

impl AuthConfig {
    /// The JWKS endpoint, derived from the issuer unless overridden.
    #[must_use]
    pub fn jwks_endpoint(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            let base = self.issuer.trim_end_matches('/');
            format!("{base}/.well-known/jwks.json")
        })
    }
}

/// Upstream management API configuration.
///
/// The gateway provisions machine-to-machine clients through the identity
/// provider's management API, authenticating with its own client
/// credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    /// Management API base URL, e.g. `https://tenant.example.auth0.com`
    pub base_url: String,
    /// Client ID of the gateway's management credential
    pub client_id: String,
    /// Client secret (supports `env:VAR_NAME` indirection)
    pub client_secret: String,
    /// Audience of the management API itself. Defaults to
    /// `{base_url}/api/v2/`.
    #[serde(default)]
    pub audience: Option<String>,
    /// Timeout applied to each upstream call. Timeouts are reported as a
    /// distinct failure: the upstream state is unknown.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Scopes granted to a newly provisioned client when the caller
    /// requests none
    pub default_scopes: Vec<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            audience: None,
            request_timeout: Duration::from_secs(10),
            default_scopes: vec!["read:api".to_string()],
        }
    }
}

impl ManagementConfig {
    /// Resolve the client secret (expand `env:VAR_NAME` indirection)
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        resolve_env_indirection(&self.client_secret)
    }

    /// The management API audience, derived from the base URL unless set.
    #[must_use]
    pub fn management_audience(&self) -> String {
        self.audience.clone().unwrap_or_else(|| {
            let base = self.base_url.trim_end_matches('/');
            format!("{base}/api/v2/")
        })
    }
}

/// Admission controls configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct AdmissionConfig {
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Origins allowed to make cross-origin requests. Requests without an
    /// `Origin` header (server-to-server) always pass.
    pub allowed_origins: Vec<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Quota for the data API route family
    pub api: QuotaConfig,
    /// Quota for the provisioning route family
    pub provisioning: QuotaConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api: QuotaConfig {
                max_requests: 1000,
                window: Duration::from_secs(15 * 60),
            },
            provisioning: QuotaConfig {
                max_requests: 100,
                window: Duration::from_secs(15 * 60),
            },
        }
    }
}

/// A request quota: at most `max_requests` per client IP per `window`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Maximum requests within the window
    pub max_requests: u32,
    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be
    /// parsed, or fails validation.
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

        // Merge environment variables (AUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("AUTH_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before `env:` resolution)
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Fails fast on missing or placeholder issuer/audience values so a
    /// misconfigured gateway never accepts traffic.
    pub fn validate(&self) -> Result<()> {
        if self.auth.issuer.is_empty() {
            return Err(Error::Config("auth.issuer is required".to_string()));
        }
        if url::Url::parse(&self.auth.issuer).is_err() {
            return Err(Error::Config(format!(
                "auth.issuer is not a valid URL: {}",
                self.auth.issuer
            )));
        }
        if !self.auth.issuer.starts_with("https://") {
            tracing::warn!(issuer = %self.auth.issuer, "Token issuer is not HTTPS");
        }
        if self.auth.audience.is_empty() || self.auth.audience == "{API_IDENTIFIER}" {
            return Err(Error::Config(
                "auth.audience must be set to the API identifier".to_string(),
            ));
        }
        if self.auth.algorithms.is_empty() {
            return Err(Error::Config(
                "auth.algorithms must list at least one algorithm".to_string(),
            ));
        }
        if self.management.base_url.is_empty() {
            return Err(Error::Config(
                "management.base_url is required".to_string(),
            ));
        }
        if self.management.client_id.is_empty() || self.management.client_secret.is_empty() {
            return Err(Error::Config(
                "management.client_id and management.client_secret are required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `env:VAR_NAME` indirection; literal values pass through.
fn resolve_env_indirection(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
