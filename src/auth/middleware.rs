//! Authentication and scope-enforcement middleware.
//!
//! `auth_middleware` runs on every protected route: it extracts the bearer
//! token, verifies it, normalizes the scopes and injects an [`AuthContext`]
//! into request extensions for downstream handlers. `scope_guard` is
//! attached per-route with that route's required scopes.
//!
//! Rejections are deliberately asymmetric: every verification failure maps
//! to the same 401 body (the specific reason is logged, never leaked),
//! while a policy denial is a 403 that names the missing scopes. An
//! authenticated caller is told what they lack; an unauthenticated one is
//! not told why.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::policy::{self, Decision};
use super::scopes::{self, ScopeSet};
use super::verifier::{ClaimSet, TokenVerifier};

/// Verified request identity, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Verified subject (`sub` claim).
    pub subject: String,
    /// Canonical scope set derived from the claims.
    pub scopes: ScopeSet,
    /// The full verified claim set.
    pub claims: ClaimSet,
}

/// Authentication middleware for protected routes.
pub async fn auth_middleware(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(request.headers()) else {
        warn!(path = %path, "Missing Authorization header");
        return unauthenticated_response();
    };

    match verifier.verify(token).await {
        Ok(claims) => {
            let context = AuthContext {
                subject: claims.sub.clone(),
                scopes: scopes::normalize(&claims),
                claims,
            };
            debug!(path = %path, subject = %context.subject, "Authenticated request");
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            // Specific reason goes to the log only; the response body is
            // uniform across all verification failures.
            warn!(path = %path, error = %e, "Token verification failed");
            unauthenticated_response()
        }
    }
}

/// Per-route scope enforcement, attached with
/// `middleware::from_fn_with_state(REQUIRED, scope_guard)`.
pub async fn scope_guard(
    State(required): State<&'static [&'static str]>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(context) = request.extensions().get::<AuthContext>() else {
        // The auth middleware always runs first on protected routes; a
        // missing context means the route was wired outside it.
        warn!(path = %request.uri().path(), "Scope check without auth context");
        return unauthenticated_response();
    };

    let required_set: ScopeSet = required.iter().copied().collect();
    match policy::authorize(&context.scopes, &required_set) {
        Decision::Allow => next.run(request).await,
        Decision::Deny { missing } => {
            warn!(
                path = %request.uri().path(),
                subject = %context.subject,
                missing = ?missing,
                "Insufficient scope"
            );
            forbidden_response(&missing)
        }
    }
}

/// Extract the bearer token from the `Authorization` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
}

/// Uniform 401 response — identical body for every verification failure.
fn unauthenticated_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({
            "error": "invalid_token",
            "message": "Authentication required. Use: Authorization: Bearer <token>"
        })),
    )
        .into_response()
}

/// 403 response naming the missing scopes.
fn forbidden_response(missing: &[String]) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "insufficient_scope",
            "message": "Token is valid but lacks required scopes",
            "missing_scopes": missing
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn lowercase_bearer_prefix_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn missing_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn non_bearer_scheme_yields_none() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn unauthenticated_response_is_401_with_challenge() {
        let response = unauthenticated_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            "Bearer"
        );
    }

    #[test]
    fn forbidden_response_is_403() {
        let response = forbidden_response(&["admin:api".to_string()]);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
