//! Bearer token verification — signature, algorithm, issuer, audience and
//! time-window checks.
//!
//! # Verification flow
//!
//! 1. Decode the token header (no verification) to read `alg` and `kid`.
//! 2. Reject any algorithm outside the configured allow-list. Symmetric
//!    algorithms never make the list; a declared `alg` of `none` fails
//!    header decoding and is rejected as malformed.
//! 3. Resolve the signing key by `kid` through the [`KeyResolver`].
//! 4. Verify the signature over the signed content.
//! 5. Check the `iss` claim for exact equality with the expected issuer.
//! 6. Check that the expected audience is a member of the `aud` claim
//!    (single string or array).
//! 7. Check the time window: reject before `iat` minus the clock-skew
//!    leeway, and after `exp`.
//!
//! The ordering makes failures distinguishable in logs; every rejection is
//! equally fatal to the request. A claim set is only handed out once all
//! checks pass; there is no partial trust.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, TokenData, Validation, errors::ErrorKind};
use serde::Deserialize;
use tracing::warn;

use super::keys::{KeyError, KeyResolver};
use super::scopes::ScpClaim;

/// Error variants for token verification failures.
///
/// All variants surface to the caller as the same uniform
/// "not authenticated" response; the variant itself is for logs only.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The token is not a decodable three-part signed structure.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The declared algorithm is not in the allow-list.
    #[error("Disallowed algorithm: {0:?}")]
    DisallowedAlgorithm(Algorithm),

    /// The token header carries no `kid`.
    #[error("Token missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` is not in the issuer's published key set.
    #[error("Unknown key ID: {0}")]
    UnknownKey(String),

    /// The key set could not be fetched. The token is unverifiable,
    /// which is distinct from invalid.
    #[error("Signing keys unavailable: {0}")]
    KeysUnavailable(#[source] reqwest::Error),

    /// Signature verification failed.
    #[error("Signature verification failed")]
    BadSignature,

    /// The `iss` claim does not equal the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer URL.
        expected: String,
        /// Issuer found in the token.
        actual: String,
    },

    /// The expected audience is not present in the `aud` claim.
    #[error("Audience mismatch: token not addressed to {expected}")]
    AudienceMismatch {
        /// Configured audience.
        expected: String,
    },

    /// Current time is before `iat` minus the allowed clock skew.
    #[error("Token not yet valid (iat {iat}, now {now})")]
    NotYetValid {
        /// Issued-at claim (Unix seconds).
        iat: u64,
        /// Verification time (Unix seconds).
        now: u64,
    },

    /// Current time is after `exp`.
    #[error("Token expired (exp {exp}, now {now})")]
    Expired {
        /// Expiry claim (Unix seconds).
        exp: u64,
        /// Verification time (Unix seconds).
        now: u64,
    },
}

/// Decoded claims of a verified token.
///
/// Instances only exist after every verification step has passed; a token
/// that fails any check yields a [`VerifyError`], never a partial claim set.
#[derive(Debug, Clone, Deserialize)]
pub struct ClaimSet {
    /// Subject — the opaque user or client id.
    pub sub: String,
    /// Issuer URL.
    pub iss: String,
    /// Audience — single string or array; membership-checked, never
    /// branched on elsewhere.
    #[serde(default)]
    pub aud: serde_json::Value,
    /// Issued-at (Unix seconds).
    pub iat: u64,
    /// Expiry (Unix seconds).
    pub exp: u64,
    /// Space-delimited scope string (delegated user tokens).
    #[serde(default)]
    pub scope: Option<String>,
    /// Alternative scope claim, string or array form.
    #[serde(default)]
    pub scp: Option<ScpClaim>,
    /// Fine-grained permission strings (RBAC-enabled tokens).
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    /// Authorized party — the client id the token was issued to.
    #[serde(default)]
    pub azp: Option<String>,
    /// Grant type the token was obtained through.
    #[serde(default)]
    pub gty: Option<String>,
}

/// Token verifier — holds the expected issuer/audience and the key cache.
pub struct TokenVerifier {
    keys: KeyResolver,
    issuer: String,
    audience: String,
    allowed: Vec<Algorithm>,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Create a verifier.
    ///
    /// `algorithms` entries that are unknown or symmetric are dropped with
    /// a warning: published key sets carry asymmetric material only, and
    /// accepting an HMAC algorithm against them is a known token-forgery
    /// vector.
    #[must_use]
    pub fn new(
        keys: KeyResolver,
        issuer: String,
        audience: String,
        algorithms: &[String],
        leeway: Duration,
    ) -> Self {
        let allowed: Vec<Algorithm> = algorithms
            .iter()
            .filter_map(|name| match name.parse::<Algorithm>() {
                Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) => {
                    warn!(algorithm = %name, "Symmetric algorithm ignored in allow-list");
                    None
                }
                Ok(alg) => Some(alg),
                Err(_) => {
                    warn!(algorithm = %name, "Unknown algorithm ignored in allow-list");
                    None
                }
            })
            .collect();

        Self {
            keys,
            issuer,
            audience,
            allowed,
            leeway_secs: leeway.as_secs(),
        }
    }

    /// Verify a bearer token and return its claim set.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] naming the first check that failed, in the
    /// order documented at the module level.
    pub async fn verify(&self, token: &str) -> Result<ClaimSet, VerifyError> {
        self.verify_at(token, now_unix()).await
    }

    /// [`Self::verify`] with an injected verification time.
    async fn verify_at(&self, token: &str, now: u64) -> Result<ClaimSet, VerifyError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;

        if !self.allowed.contains(&header.alg) {
            return Err(VerifyError::DisallowedAlgorithm(header.alg));
        }

        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;

        let key = self.keys.resolve(&kid).await.map_err(|e| match e {
            KeyError::NotFound(kid) => VerifyError::UnknownKey(kid),
            KeyError::Fetch(e) => VerifyError::KeysUnavailable(e),
        })?;

        // Signature only; issuer, audience and time-window checks are
        // applied manually below so each failure is distinguishable. The
        // default required-claim set (`exp`) stays: a token without an
        // expiry is malformed in this data model.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_aud = false;

        let token_data: TokenData<ClaimSet> = jsonwebtoken::decode(token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => VerifyError::BadSignature,
                _ => VerifyError::Malformed(e.to_string()),
            })?;
        let claims = token_data.claims;

        validate_claims(&claims, &self.issuer, &self.audience, self.leeway_secs, now)?;

        Ok(claims)
    }
}

/// Validate issuer, audience and time window of decoded claims.
///
/// Pure over the injected `now` so the window logic is directly testable.
fn validate_claims(
    claims: &ClaimSet,
    expected_issuer: &str,
    expected_audience: &str,
    leeway_secs: u64,
    now: u64,
) -> Result<(), VerifyError> {
    if claims.iss != expected_issuer {
        return Err(VerifyError::IssuerMismatch {
            expected: expected_issuer.to_string(),
            actual: claims.iss.clone(),
        });
    }

    if !audience_contains(&claims.aud, expected_audience) {
        return Err(VerifyError::AudienceMismatch {
            expected: expected_audience.to_string(),
        });
    }

    if now < claims.iat.saturating_sub(leeway_secs) {
        return Err(VerifyError::NotYetValid {
            iat: claims.iat,
            now,
        });
    }

    if now > claims.exp {
        return Err(VerifyError::Expired {
            exp: claims.exp,
            now,
        });
    }

    Ok(())
}

/// Membership check over an `aud` claim that may be a single string or an
/// array of strings.
fn audience_contains(aud_claim: &serde_json::Value, expected: &str) -> bool {
    match aud_claim {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == expected)),
        _ => false,
    }
}

/// Current Unix time in seconds.
fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
