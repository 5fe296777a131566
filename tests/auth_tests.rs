//! End-to-end verification pipeline tests
//!
//! Exercises the full chain the authentication middleware runs:
//! token decoding, the ordered verification checks, scope normalization
//! and the policy decision. Tokens are crafted locally; the JWKS endpoint
//! points at a closed port so any test reaching key resolution observes
//! the "unverifiable" failure mode rather than the network.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pretty_assertions::assert_eq;

use auth_gateway::auth::policy::{self, Decision};
use auth_gateway::auth::scopes::{self, ScopeSet};
use auth_gateway::auth::verifier::{ClaimSet, VerifyError};
use auth_gateway::auth::{KeyResolver, TokenVerifier};

const ISSUER: &str = "https://tenant.example.com/";
const AUDIENCE: &str = "https://api.example.com";

/// A verifier whose key resolver points at a port nothing listens on.
/// Checks that precede key resolution never touch it.
fn verifier() -> TokenVerifier {
    TokenVerifier::new(
        KeyResolver::new(
            "http://127.0.0.1:9/.well-known/jwks.json".to_string(),
            Duration::from_secs(3600),
        ),
        ISSUER.to_string(),
        AUDIENCE.to_string(),
        &["RS256".to_string()],
        Duration::from_secs(60),
    )
}

fn standard_claims() -> serde_json::Value {
    serde_json::json!({
        "sub": "auth0|user1",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": 1_700_000_000u64,
        "exp": 4_102_444_800u64,
        "scope": "read:api write:api"
    })
}

/// Assemble a token by hand — decodable header and payload, garbage
/// signature. Enough to exercise every check up to signature verification.
fn forged_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        URL_SAFE_NO_PAD.encode("not-a-signature")
    )
}

// ── Ordered verification checks ───────────────────────────────────────────

#[tokio::test]
async fn hmac_signed_token_rejected_for_algorithm() {
    // GIVEN: an otherwise-valid token signed with a symmetric algorithm
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &standard_claims(),
        &EncodingKey::from_secret(b"attacker-chosen-secret"),
    )
    .unwrap();

    // THEN: rejected on the algorithm check, before any key lookup
    let err = verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::DisallowedAlgorithm(Algorithm::HS256)));
}

#[tokio::test]
async fn algorithm_check_precedes_expiry() {
    // GIVEN: a token that is both expired and HMAC-signed
    let mut claims = standard_claims();
    claims["exp"] = serde_json::json!(1_000u64);
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(b"secret"),
    )
    .unwrap();

    // THEN: the algorithm failure reports, matching the documented order
    let err = verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::DisallowedAlgorithm(_)));
}

#[tokio::test]
async fn malformed_token_rejected() {
    let err = verifier().verify("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, VerifyError::Malformed(_)));
}

#[tokio::test]
async fn unsigned_token_rejected() {
    // GIVEN: a token declaring the "none" algorithm. There is no decodable
    // algorithm to compare against the allow-list, so it dies at decoding.
    let token = forged_token(
        &serde_json::json!({"alg": "none", "typ": "JWT"}),
        &standard_claims(),
    );

    let err = verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::Malformed(_)));
}

#[tokio::test]
async fn missing_kid_rejected_before_key_fetch() {
    // GIVEN: an allowed algorithm but no kid in the header
    let token = forged_token(
        &serde_json::json!({"alg": "RS256", "typ": "JWT"}),
        &standard_claims(),
    );

    // THEN: rejected without contacting the (closed) JWKS endpoint
    let err = verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::MissingKeyId));
}

#[tokio::test]
async fn unreachable_key_endpoint_is_unverifiable_not_invalid() {
    // GIVEN: a well-formed token whose kid forces a key fetch
    let token = forged_token(
        &serde_json::json!({"alg": "RS256", "typ": "JWT", "kid": "key-1"}),
        &standard_claims(),
    );

    // THEN: the failure is "keys unavailable", distinct from any claim
    // or signature failure
    let err = verifier().verify(&token).await.unwrap_err();
    assert!(matches!(err, VerifyError::KeysUnavailable(_)));
}

// ── Normalization and policy across module boundaries ─────────────────────

fn claims_from(value: serde_json::Value) -> ClaimSet {
    serde_json::from_value(value).unwrap()
}

#[test]
fn all_claim_shapes_normalize_to_the_same_scope_set() {
    let base = |extra: serde_json::Value| {
        let mut v = serde_json::json!({
            "sub": "auth0|user1",
            "iss": ISSUER,
            "aud": AUDIENCE,
            "iat": 1_700_000_000u64,
            "exp": 1_700_003_600u64
        });
        v.as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        v
    };

    let from_scope = scopes::normalize(&claims_from(
        base(serde_json::json!({"scope": "read:api write:api"})),
    ));
    let from_scp = scopes::normalize(&claims_from(
        base(serde_json::json!({"scp": ["write:api", "read:api"]})),
    ));
    let from_permissions = scopes::normalize(&claims_from(
        base(serde_json::json!({"permissions": ["read:api", "write:api"]})),
    ));

    assert_eq!(from_scope, from_scp);
    assert_eq!(from_scp, from_permissions);
    assert!(from_scope.contains("read:api"));
    assert!(from_scope.contains("write:api"));
}

#[test]
fn read_scope_denied_on_admin_route_names_the_missing_scope() {
    // GIVEN: a caller with read:api hitting a route requiring admin:api
    let granted: ScopeSet = ["read:api"].into_iter().collect();
    let required: ScopeSet = ["admin:api"].into_iter().collect();

    // THEN: forbidden, and the denial reports admin:api as missing
    assert_eq!(
        policy::authorize(&granted, &required),
        Decision::Deny {
            missing: vec!["admin:api".to_string()]
        }
    );
}

#[test]
fn conjunctive_requirement_reports_only_the_gap() {
    let granted: ScopeSet = ["read:api"].into_iter().collect();
    let required: ScopeSet = ["read:api", "write:api"].into_iter().collect();

    assert_eq!(
        policy::authorize(&granted, &required),
        Decision::Deny {
            missing: vec!["write:api".to_string()]
        }
    );
}

#[test]
fn machine_token_permissions_satisfy_policy() {
    // A client-credentials token carrying fine-grained permissions passes
    // the same policy as a delegated token with a scope string
    let claims = claims_from(serde_json::json!({
        "sub": "client-abc@clients",
        "iss": ISSUER,
        "aud": AUDIENCE,
        "iat": 1_700_000_000u64,
        "exp": 1_700_003_600u64,
        "permissions": ["read:api"],
        "gty": "client-credentials"
    }));
    let granted = scopes::normalize(&claims);
    let required: ScopeSet = ["read:api"].into_iter().collect();
    assert!(policy::authorize(&granted, &required).is_allowed());
}
