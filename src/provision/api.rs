//! Upstream management API client.
//!
//! The identity provider's management API is the system of record for
//! machine-to-machine clients and their grants; this module is its only
//! consumer. [`ManagementApi`] is the seam the provisioning service works
//! against: tests substitute an in-memory implementation, production uses
//! [`HttpManagementApi`].
//!
//! The HTTP client authenticates with its own client-credentials grant
//! against the management audience and caches that token until shortly
//! before expiry. Every call carries a bounded timeout; a timeout is
//! reported distinctly from an explicit upstream rejection because the
//! upstream state is unknown (the call may have partially succeeded).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ManagementConfig;

/// Error variants for upstream management API failures.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The call timed out; upstream state is unknown.
    #[error("Management API timeout during {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The upstream rejected the call with an error status.
    #[error("Management API returned {status}: {detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Upstream error detail (logged, never echoed to API callers).
        detail: String,
    },

    /// Network-level failure.
    #[error("Management API transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The upstream response could not be decoded.
    #[error("Management API response decode error: {0}")]
    Decode(#[source] reqwest::Error),
}

impl UpstreamError {
    fn from_send(e: reqwest::Error, operation: &'static str) -> Self {
        if e.is_timeout() {
            Self::Timeout { operation }
        } else {
            Self::Transport(e)
        }
    }
}

/// Owner and creation stamp attached to every provisioned client.
///
/// Metadata values round-trip through the upstream as strings; the owning
/// subject recorded here is re-verified on every mutating call and never
/// taken from client-supplied input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Subject of the authenticated user the client was created for.
    pub created_by: String,
    /// Creation time, RFC 3339.
    pub created_at: String,
}

/// A machine-to-machine client as the upstream reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Upstream-assigned client identifier.
    pub client_id: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// One-time secret, present only in the creation response and absent
    /// from every subsequent read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Ownership metadata.
    #[serde(default)]
    pub client_metadata: Option<ClientMetadata>,
}

impl ClientRecord {
    /// The owning subject, if the record carries ownership metadata.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.client_metadata.as_ref().map(|m| m.created_by.as_str())
    }
}

/// Payload for creating a client. Application type and grant types are
/// fixed: every provisioned client is a non-interactive machine client
/// using client credentials.
#[derive(Debug, Clone, Serialize)]
pub struct CreateClientRequest {
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Always `non_interactive`.
    pub app_type: &'static str,
    /// Always `["client_credentials"]`.
    pub grant_types: &'static [&'static str],
    /// Optional callback URLs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<Vec<String>>,
    /// Optional allowed web origins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    /// Ownership metadata.
    pub client_metadata: ClientMetadata,
}

/// Payload for attaching a grant to a client.
#[derive(Debug, Clone, Serialize)]
pub struct CreateGrantRequest {
    /// The client the grant binds.
    pub client_id: String,
    /// The protected resource the grant targets.
    pub audience: String,
    /// Granted scopes.
    pub scope: Vec<String>,
}

/// A grant as the upstream reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct GrantRecord {
    /// Upstream-assigned grant identifier.
    pub id: String,
    /// The bound client.
    pub client_id: String,
    /// The granted audience.
    pub audience: String,
    /// The granted scopes.
    #[serde(default)]
    pub scope: Vec<String>,
}

/// The management API operations the provisioning service needs.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Create a client. The response carries the one-time secret.
    async fn create_client(
        &self,
        request: CreateClientRequest,
    ) -> Result<ClientRecord, UpstreamError>;

    /// Attach a scoped grant to a client.
    async fn create_grant(&self, request: CreateGrantRequest)
    -> Result<GrantRecord, UpstreamError>;

    /// Fetch a client by id. `None` if the upstream does not know it.
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>, UpstreamError>;

    /// Delete a client. Returns `false` if it was already gone; callers
    /// treat both outcomes as success (concurrent deletes are tolerated).
    async fn delete_client(&self, client_id: &str) -> Result<bool, UpstreamError>;

    /// List all clients. The minimal contract assumes a bounded result
    /// set; a production tenant needs pagination here.
    async fn list_clients(&self) -> Result<Vec<ClientRecord>, UpstreamError>;
}

/// Management token response from the client-credentials exchange.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    86_400
}

/// Cached management token.
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    /// Fresh while more than a 30s margin remains before expiry.
    fn is_fresh(&self, now: Instant) -> bool {
        now + Duration::from_secs(30) < self.expires_at
    }
}

/// HTTP implementation of [`ManagementApi`].
pub struct HttpManagementApi {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    audience: String,
    token: RwLock<Option<CachedToken>>,
}

impl HttpManagementApi {
    /// Create a client from configuration. Secrets are resolved through
    /// `env:VAR` indirection at this point, not kept in the config value.
    #[must_use]
    pub fn new(config: &ManagementConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.resolve_client_secret(),
            audience: config.management_audience(),
            token: RwLock::new(None),
        }
    }

    /// Get a management token, exchanging client credentials if the cached
    /// one is missing or about to expire.
    async fn token(&self) -> Result<String, UpstreamError> {
        {
            let cached = self.token.read();
            if let Some(ref t) = *cached {
                if t.is_fresh(Instant::now()) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        debug!("Fetching management API token");
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "audience": self.audience,
            }))
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "token"))?;

        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await.map_err(UpstreamError::Decode)?;

        let access_token = token.access_token.clone();
        *self.token.write() = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });

        info!("Management API token acquired");
        Ok(access_token)
    }
}

#[async_trait]
impl ManagementApi for HttpManagementApi {
    async fn create_client(
        &self,
        request: CreateClientRequest,
    ) -> Result<ClientRecord, UpstreamError> {
        let token = self.token().await?;
        let response = self
            .http
            .post(format!("{}/api/v2/clients", self.base_url))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "create-client"))?;

        let response = check_status(response).await?;
        response.json().await.map_err(UpstreamError::Decode)
    }

    async fn create_grant(
        &self,
        request: CreateGrantRequest,
    ) -> Result<GrantRecord, UpstreamError> {
        let token = self.token().await?;
        let response = self
            .http
            .post(format!("{}/api/v2/client-grants", self.base_url))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "create-grant"))?;

        let response = check_status(response).await?;
        response.json().await.map_err(UpstreamError::Decode)
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>, UpstreamError> {
        let token = self.token().await?;
        let response = self
            .http
            .get(format!("{}/api/v2/clients/{client_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "get-client"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let record = response.json().await.map_err(UpstreamError::Decode)?;
        Ok(Some(record))
    }

    async fn delete_client(&self, client_id: &str) -> Result<bool, UpstreamError> {
        let token = self.token().await?;
        let response = self
            .http
            .delete(format!("{}/api/v2/clients/{client_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "delete-client"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, UpstreamError> {
        let token = self.token().await?;
        let response = self
            .http
            .get(format!("{}/api/v2/clients", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UpstreamError::from_send(e, "list-clients"))?;

        let response = check_status(response).await?;
        response.json().await.map_err(UpstreamError::Decode)
    }
}

/// Turn an error status into [`UpstreamError::Status`], keeping the body
/// as diagnostic detail.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(UpstreamError::Status {
        status: status.as_u16(),
        detail,
    })
}
