//! Scope normalization — heterogeneous permission claims to one canonical set.
//!
//! Tokens carry granted permissions in one of three shapes depending on how
//! they were issued: a space-delimited `scope` string (delegated user
//! tokens), a `scp` claim that may be a string or an array (some issuer
//! configurations), or a fine-grained `permissions` array (RBAC-enabled
//! machine tokens). Everything downstream of this module sees a single
//! [`ScopeSet`]; nothing else in the crate branches on claim shape.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::verifier::ClaimSet;

/// A canonical, deduplicated set of scope strings.
///
/// Ordered internally so display output and missing-scope reporting are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// The empty scope set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `scope` is present in the set.
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of scopes in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate the scopes in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Scopes in `required` that are absent from this set, sorted.
    #[must_use]
    pub fn missing_from(&self, required: &ScopeSet) -> Vec<String> {
        required
            .0
            .iter()
            .filter(|s| !self.0.contains(*s))
            .cloned()
            .collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{scope}")?;
            first = false;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// The `scp` claim arrives as either a single space-delimited string or an
/// array of scope strings; decoded as a tagged variant at the boundary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScpClaim {
    /// Space-delimited string form
    Delimited(String),
    /// Array form
    List(Vec<String>),
}

impl ScpClaim {
    fn to_scope_set(&self) -> ScopeSet {
        match self {
            Self::Delimited(s) => split_scope_string(s),
            Self::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Derive the effective [`ScopeSet`] from a verified claim set.
///
/// Precedence when multiple shapes are present: the `scope` string wins
/// over `scp`, which wins over `permissions`. The precedence is fixed:
/// claim shape varies with how the token was issued, and silently
/// preferring a different claim would change authorization outcomes.
/// Absent all three, the result is the empty set.
#[must_use]
pub fn normalize(claims: &ClaimSet) -> ScopeSet {
    if let Some(ref scope) = claims.scope {
        return split_scope_string(scope);
    }
    if let Some(ref scp) = claims.scp {
        return scp.to_scope_set();
    }
    if let Some(ref permissions) = claims.permissions {
        return permissions.iter().map(String::as_str).collect();
    }
    ScopeSet::new()
}

/// Split a space-delimited scope string, dropping empty fragments.
fn split_scope_string(s: &str) -> ScopeSet {
    s.split_whitespace().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verifier::ClaimSet;

    fn claims_with(
        scope: Option<&str>,
        scp: Option<ScpClaim>,
        permissions: Option<Vec<&str>>,
    ) -> ClaimSet {
        ClaimSet {
            sub: "auth0|user1".to_string(),
            iss: "https://tenant.example.com/".to_string(),
            aud: serde_json::json!("https://api.example.com"),
            iat: 1_700_000_000,
            exp: 1_700_003_600,
            scope: scope.map(str::to_string),
            scp,
            permissions: permissions.map(|p| p.iter().map(|s| (*s).to_string()).collect()),
            azp: None,
            gty: None,
        }
    }

    #[test]
    fn normalize_scope_string() {
        // GIVEN: a space-delimited scope claim
        let claims = claims_with(Some("read:api write:api"), None, None);

        // THEN: both scopes present, deduplicated set
        let scopes = normalize(&claims);
        assert!(scopes.contains("read:api"));
        assert!(scopes.contains("write:api"));
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn normalize_scp_array() {
        let claims = claims_with(
            None,
            Some(ScpClaim::List(vec![
                "read:api".to_string(),
                "write:api".to_string(),
            ])),
            None,
        );
        let scopes = normalize(&claims);
        assert!(scopes.contains("read:api"));
        assert!(scopes.contains("write:api"));
    }

    #[test]
    fn normalize_scp_string() {
        let claims = claims_with(
            None,
            Some(ScpClaim::Delimited("read:api write:api".to_string())),
            None,
        );
        let scopes = normalize(&claims);
        assert!(scopes.contains("read:api"));
        assert!(scopes.contains("write:api"));
    }

    #[test]
    fn normalize_permissions_array() {
        let claims = claims_with(None, None, Some(vec!["read:api", "write:api"]));
        let scopes = normalize(&claims);
        assert!(scopes.contains("read:api"));
        assert!(scopes.contains("write:api"));
    }

    #[test]
    fn all_three_shapes_yield_the_same_set() {
        // GIVEN: the equivalent permission set in all three claim shapes
        let from_scope = normalize(&claims_with(Some("read:api write:api"), None, None));
        let from_scp = normalize(&claims_with(
            None,
            Some(ScpClaim::List(vec![
                "write:api".to_string(),
                "read:api".to_string(),
            ])),
            None,
        ));
        let from_permissions =
            normalize(&claims_with(None, None, Some(vec!["read:api", "write:api"])));

        // THEN: one canonical set, order-irrelevant
        assert_eq!(from_scope, from_scp);
        assert_eq!(from_scp, from_permissions);
    }

    #[test]
    fn scope_string_takes_precedence_over_scp_and_permissions() {
        let claims = claims_with(
            Some("read:api"),
            Some(ScpClaim::List(vec!["admin:api".to_string()])),
            Some(vec!["admin:api"]),
        );
        let scopes = normalize(&claims);
        assert!(scopes.contains("read:api"));
        assert!(!scopes.contains("admin:api"));
    }

    #[test]
    fn scp_takes_precedence_over_permissions() {
        let claims = claims_with(
            None,
            Some(ScpClaim::List(vec!["write:api".to_string()])),
            Some(vec!["admin:api"]),
        );
        let scopes = normalize(&claims);
        assert!(scopes.contains("write:api"));
        assert!(!scopes.contains("admin:api"));
    }

    #[test]
    fn no_claims_yield_empty_set() {
        let scopes = normalize(&claims_with(None, None, None));
        assert!(scopes.is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let scopes = normalize(&claims_with(Some("read:api read:api"), None, None));
        assert_eq!(scopes.len(), 1);
    }

    #[test]
    fn display_is_space_delimited_and_sorted() {
        let scopes: ScopeSet = ["write:api", "read:api"].into_iter().collect();
        assert_eq!(scopes.to_string(), "read:api write:api");
    }

    #[test]
    fn missing_from_reports_sorted_difference() {
        let granted: ScopeSet = ["read:api"].into_iter().collect();
        let required: ScopeSet = ["write:api", "read:api", "admin:api"].into_iter().collect();
        assert_eq!(granted.missing_from(&required), vec!["admin:api", "write:api"]);
    }

    #[test]
    fn scp_claim_deserializes_from_both_shapes() {
        let from_string: ScpClaim = serde_json::from_str(r#""read:api write:api""#).unwrap();
        let from_array: ScpClaim = serde_json::from_str(r#"["read:api","write:api"]"#).unwrap();
        assert_eq!(from_string.to_scope_set(), from_array.to_scope_set());
    }
}
