//! Client provisioning — create, list and delete machine-to-machine
//! clients on behalf of authenticated owners.
//!
//! A provisioning request walks Validating → CreatingClient →
//! CreatingGrant → Done, with a failure exit at each step. The one step
//! that cannot fail cleanly is the grant attach: the client already exists
//! upstream by then. That partial state is surfaced to the caller as
//! `grant_attached: false` on the returned record, never swallowed and
//! never auto-retried (the caller holds the one-time secret and decides
//! whether to retry the grant or delete the orphan).
//!
//! Ownership is enforced at this boundary on every mutating call: the
//! owning subject comes from the caller's verified claims, is stamped into
//! upstream metadata at creation, and is re-checked against that metadata
//! before deletion.

use std::future::Future;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::api::{
    ClientMetadata, ClientRecord, CreateClientRequest, CreateGrantRequest, ManagementApi,
    UpstreamError,
};

/// Error variants for provisioning operations.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Invalid caller input (e.g. empty client name).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller's subject does not own the client.
    #[error("Client {0} is owned by another subject")]
    NotOwner(String),

    /// The client does not exist upstream.
    #[error("Client not found: {0}")]
    NotFound(String),

    /// The upstream management API failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Caller input for creating a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateClientInput {
    /// Display name (required, non-empty).
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional callback URLs.
    #[serde(default)]
    pub callbacks: Option<Vec<String>>,
    /// Optional allowed web origins.
    #[serde(default)]
    pub allowed_origins: Option<Vec<String>>,
    /// Requested grant scopes; defaults to the configured minimal
    /// read-only scope when omitted.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

/// Result of a create operation — the full client record including the
/// one-time secret, plus the grant outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedClient {
    /// Upstream-assigned client identifier.
    pub client_id: String,
    /// One-time secret. This is the only place it ever appears.
    pub client_secret: Option<String>,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Creation time, RFC 3339.
    pub created_at: Option<String>,
    /// Whether the scoped grant was attached. `false` means the client
    /// exists upstream with no effective permissions and needs caller
    /// action.
    pub grant_attached: bool,
}

/// A client as returned by list — never carries a secret.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    /// Upstream-assigned client identifier.
    pub client_id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Creation time, RFC 3339.
    pub created_at: Option<String>,
}

impl From<ClientRecord> for ClientSummary {
    fn from(record: ClientRecord) -> Self {
        Self {
            client_id: record.client_id,
            name: record.name,
            description: record.description,
            created_at: record.client_metadata.map(|m| m.created_at),
        }
    }
}

/// The provisioning service.
pub struct ProvisioningService {
    api: Arc<dyn ManagementApi>,
    /// Audience every grant targets (the protected API identifier).
    audience: String,
    /// Scopes granted when the caller requests none.
    default_scopes: Vec<String>,
}

impl ProvisioningService {
    /// Create the service over a management API implementation.
    #[must_use]
    pub fn new(api: Arc<dyn ManagementApi>, audience: String, default_scopes: Vec<String>) -> Self {
        Self {
            api,
            audience,
            default_scopes,
        }
    }

    /// Create a machine-to-machine client owned by `owner` and attach a
    /// scoped grant for the configured audience.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::Validation`] on empty name;
    /// [`ProvisionError::Upstream`] if client creation itself fails. A
    /// grant-attach failure after successful client creation is *not* an
    /// error: the record is returned with `grant_attached: false`.
    pub async fn create(
        &self,
        owner: &str,
        input: CreateClientInput,
    ) -> Result<ProvisionedClient, ProvisionError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ProvisionError::Validation(
                "client name is required".to_string(),
            ));
        }

        let created_at = Utc::now().to_rfc3339();
        let scopes = input.scopes.unwrap_or_else(|| self.default_scopes.clone());

        let request = CreateClientRequest {
            name: name.to_string(),
            description: input
                .description
                .unwrap_or_else(|| "API client".to_string()),
            app_type: "non_interactive",
            grant_types: &["client_credentials"],
            callbacks: input.callbacks.filter(|c| !c.is_empty()),
            allowed_origins: input.allowed_origins.filter(|o| !o.is_empty()),
            client_metadata: ClientMetadata {
                created_by: owner.to_string(),
                created_at: created_at.clone(),
            },
        };

        let client = self.api.create_client(request).await?;
        info!(client_id = %client.client_id, owner = %owner, "Created client");

        // The grant attach is the non-atomic tail of provisioning. On
        // failure the client stays (the caller holds its one-time secret);
        // no automatic retry, no compensating delete.
        let grant_attached = match self
            .api
            .create_grant(CreateGrantRequest {
                client_id: client.client_id.clone(),
                audience: self.audience.clone(),
                scope: scopes,
            })
            .await
        {
            Ok(grant) => {
                info!(client_id = %client.client_id, grant_id = %grant.id, "Attached grant");
                true
            }
            Err(e) => {
                error!(
                    client_id = %client.client_id,
                    error = %e,
                    "Grant creation failed after client creation; returning partial result"
                );
                false
            }
        };

        Ok(ProvisionedClient {
            client_id: client.client_id,
            client_secret: client.client_secret,
            name: client.name,
            description: client.description,
            created_at: Some(
                client
                    .client_metadata
                    .map_or(created_at, |m| m.created_at),
            ),
            grant_attached,
        })
    }

    /// List the clients owned by `owner`. Secrets never appear here.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::Upstream`] after one retry with backoff.
    pub async fn list(&self, owner: &str) -> Result<Vec<ClientSummary>, ProvisionError> {
        let clients = retry_read("list-clients", || self.api.list_clients()).await?;

        Ok(clients
            .into_iter()
            .filter(|c| c.owner() == Some(owner))
            .map(ClientSummary::from)
            .collect())
    }

    /// Delete a client after re-verifying ownership.
    ///
    /// The upstream read and the delete are not atomic; a client deleted
    /// concurrently between the two is treated as successfully deleted.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::NotFound`] if the client does not exist at the
    /// ownership check; [`ProvisionError::NotOwner`] if `owner` did not
    /// create it; [`ProvisionError::Upstream`] on upstream failure.
    pub async fn delete(&self, owner: &str, client_id: &str) -> Result<(), ProvisionError> {
        let record = retry_read("get-client", || self.api.get_client(client_id))
            .await?
            .ok_or_else(|| ProvisionError::NotFound(client_id.to_string()))?;

        // A record without ownership metadata was not provisioned through
        // this gateway; nobody may delete it from here.
        if record.owner() != Some(owner) {
            warn!(client_id = %client_id, subject = %owner, "Ownership mismatch on delete");
            return Err(ProvisionError::NotOwner(client_id.to_string()));
        }

        if self.api.delete_client(client_id).await? {
            info!(client_id = %client_id, owner = %owner, "Deleted client");
        } else {
            info!(client_id = %client_id, "Client already deleted upstream");
        }
        Ok(())
    }
}

/// Retry a read-only upstream call at most once with backoff. Mutating
/// calls are never routed through here.
async fn retry_read<T, F, Fut>(operation: &'static str, call: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    call.retry(ExponentialBuilder::default().with_max_times(1))
        .when(is_retryable)
        .notify(|e: &UpstreamError, delay| {
            warn!(operation = operation, error = %e, delay_ms = delay.as_millis(), "Retrying upstream read");
        })
        .await
}

/// Reads are safe to retry on transient failures; an explicit 4xx is not
/// transient.
fn is_retryable(error: &UpstreamError) -> bool {
    match error {
        UpstreamError::Timeout { .. } | UpstreamError::Transport(_) => true,
        UpstreamError::Status { status, .. } => *status >= 500,
        UpstreamError::Decode(_) => false,
    }
}
