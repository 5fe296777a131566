//! HTTP router and handlers.
//!
//! The route table is the static per-operation policy: each protected
//! route declares its minimum scope set via a `scope_guard` layer. Layer
//! order per request: trace → panic guard → CORS → origin guard → family
//! rate limit → token verification → scope check → handler.
//!
//! | Method | Path | Required scope |
//! |--------|------|----------------|
//! | `GET` | `/api/external` | none (valid token) |
//! | `GET` | `/api/v1/data` | `read:api` |
//! | `POST` | `/api/v1/data` | `write:api` |
//! | `DELETE` | `/api/v1/data/{id}` | `admin:api` |
//! | `GET` | `/api/v1/profile` | `read:profile` |
//! | `POST` | `/api/developer/clients` | none (valid token) |
//! | `GET` | `/api/developer/clients` | none (valid token) |
//! | `DELETE` | `/api/developer/clients/{client_id}` | none (valid token) |
//! | `GET` | `/api/health` | public |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    handler::Handler,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

use super::admission::{
    OriginGuard, RequestLimiter, cors_layer, origin_guard_middleware, rate_limit_middleware,
};
use crate::auth::middleware::{AuthContext, auth_middleware, scope_guard};
use crate::auth::verifier::TokenVerifier;
use crate::provision::service::{CreateClientInput, ProvisionError, ProvisioningService};

/// Required-scope constants — the policy table referenced by the routes.
const SCOPE_READ_API: &[&str] = &["read:api"];
const SCOPE_WRITE_API: &[&str] = &["write:api"];
const SCOPE_ADMIN_API: &[&str] = &["admin:api"];
const SCOPE_READ_PROFILE: &[&str] = &["read:profile"];

/// Shared application state
pub struct AppState {
    /// Token verifier used by the authentication middleware
    pub verifier: Arc<TokenVerifier>,
    /// Client provisioning service
    pub provisioning: Arc<ProvisioningService>,
    /// Rate limiter for the data API family
    pub api_limiter: Arc<RequestLimiter>,
    /// Rate limiter for the provisioning family
    pub provisioning_limiter: Arc<RequestLimiter>,
    /// Origin allow-list guard
    pub origin_guard: Arc<OriginGuard>,
    /// Origins for the CORS response headers
    pub allowed_origins: Vec<String>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let verifier = Arc::clone(&state.verifier);

    let data_routes = Router::new()
        .route("/api/external", get(external_info))
        .route(
            "/api/v1/data",
            get(list_data.layer(middleware::from_fn_with_state(SCOPE_READ_API, scope_guard)))
                .post(
                    create_data
                        .layer(middleware::from_fn_with_state(SCOPE_WRITE_API, scope_guard)),
                ),
        )
        .route(
            "/api/v1/data/{id}",
            delete(
                delete_data.layer(middleware::from_fn_with_state(SCOPE_ADMIN_API, scope_guard)),
            ),
        )
        .route(
            "/api/v1/profile",
            get(profile.layer(middleware::from_fn_with_state(SCOPE_READ_PROFILE, scope_guard))),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&verifier),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.api_limiter),
            rate_limit_middleware,
        ));

    let provisioning_routes = Router::new()
        .route(
            "/api/developer/clients",
            get(list_clients).post(create_client),
        )
        .route("/api/developer/clients/{client_id}", delete(delete_client))
        .layer(middleware::from_fn_with_state(verifier, auth_middleware))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.provisioning_limiter),
            rate_limit_middleware,
        ));

    Router::new()
        .merge(data_routes)
        .merge(provisioning_routes)
        .route("/api/health", get(health))
        // Admission and transport layers (applied to everything above)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.origin_guard),
            origin_guard_middleware,
        ))
        .layer(cors_layer(&state.allowed_origins))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Data API handlers ─────────────────────────────────────────────────────

/// `GET /api/external` — basic validated access; echoes the token info.
async fn external_info(Extension(ctx): Extension<AuthContext>) -> Response {
    let scopes: Vec<&str> = ctx.scopes.iter().collect();
    Json(json!({
        "msg": "Your access token was successfully validated!",
        "user": ctx.subject,
        "scopes": scopes,
        "token_info": {
            "iat": rfc3339(ctx.claims.iat),
            "exp": rfc3339(ctx.claims.exp),
            "audience": ctx.claims.aud,
            "grant_type": ctx.claims.gty,
            "client_id": ctx.claims.azp,
        }
    }))
    .into_response()
}

/// `GET /api/v1/data` — sample data listing.
async fn list_data(Extension(ctx): Extension<AuthContext>) -> Response {
    Json(json!({
        "data": [
            { "id": 1, "name": "Sample record 1", "type": "sample" },
            { "id": 2, "name": "Sample record 2", "type": "demo" },
            { "id": 3, "name": "Sample record 3", "type": "test" },
        ],
        "user": ctx.subject,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// Body for `POST /api/v1/data`.
#[derive(Debug, Deserialize)]
struct CreateDataRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// `POST /api/v1/data` — create a record (demonstration payload).
async fn create_data(
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateDataRequest>,
) -> Response {
    let Some(name) = body.name.filter(|n| !n.trim().is_empty()) else {
        return validation_error("name is required");
    };

    Json(json!({
        "message": "Data created",
        "data": {
            "id": Utc::now().timestamp_millis(),
            "name": name,
            "type": body.kind.unwrap_or_else(|| "default".to_string()),
            "created_by": ctx.subject,
            "created_at": Utc::now().to_rfc3339(),
        }
    }))
    .into_response()
}

/// `DELETE /api/v1/data/{id}` — delete a record (demonstration payload).
async fn delete_data(
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    Json(json!({
        "message": format!("Data {id} deleted"),
        "deleted_by": ctx.subject,
        "deleted_at": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// `GET /api/v1/profile` — identity details from the verified claims.
async fn profile(Extension(ctx): Extension<AuthContext>) -> Response {
    let scopes: Vec<&str> = ctx.scopes.iter().collect();
    Json(json!({
        "user_id": ctx.subject,
        "scopes": scopes,
        "iat": ctx.claims.iat,
        "exp": ctx.claims.exp,
        "aud": ctx.claims.aud,
    }))
    .into_response()
}

/// `GET /api/health` — unauthenticated liveness check.
async fn health() -> Response {
    Json(json!({
        "status": "ok",
        "service": "auth-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

// ── Provisioning handlers ─────────────────────────────────────────────────

/// `POST /api/developer/clients` — provision a machine-to-machine client.
async fn create_client(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(input): Json<CreateClientInput>,
) -> Response {
    match state.provisioning.create(&ctx.subject, input).await {
        Ok(client) => (StatusCode::CREATED, Json(client)).into_response(),
        Err(e) => provision_error_response(&e),
    }
}

/// `GET /api/developer/clients` — list the caller's clients.
async fn list_clients(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Response {
    match state.provisioning.list(&ctx.subject).await {
        Ok(clients) => Json(clients).into_response(),
        Err(e) => provision_error_response(&e),
    }
}

/// `DELETE /api/developer/clients/{client_id}` — delete an owned client.
async fn delete_client(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(client_id): Path<String>,
) -> Response {
    match state.provisioning.delete(&ctx.subject, &client_id).await {
        Ok(()) => Json(json!({ "message": "Client deleted" })).into_response(),
        Err(e) => provision_error_response(&e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Map a provisioning failure to its HTTP response. Upstream detail is
/// logged, never echoed.
fn provision_error_response(error: &ProvisionError) -> Response {
    match error {
        ProvisionError::Validation(message) => validation_error(message),
        ProvisionError::NotOwner(_) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "forbidden",
                "message": "You do not have permission to modify this client"
            })),
        )
            .into_response(),
        ProvisionError::NotFound(client_id) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "not_found",
                "message": format!("Client {client_id} not found")
            })),
        )
            .into_response(),
        ProvisionError::Upstream(e) => {
            error!(error = %e, "Management API failure");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "upstream_failure",
                    "message": "The identity provider could not complete the request"
                })),
            )
                .into_response()
        }
    }
}

/// Create a 400 validation error response.
fn validation_error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "validation_error",
            "message": message
        })),
    )
        .into_response()
}

/// Unix seconds to RFC 3339, `None` if out of range.
fn rfc3339(ts: u64) -> Option<String> {
    let secs = i64::try_from(ts).ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}
