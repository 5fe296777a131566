//! Admission controls — request-rate limiting and origin allow-listing.
//!
//! These run before token verification: a request that fails admission
//! never reaches the verifier. Rate limiting is keyed by client IP with
//! separate quotas per route family (the data API tolerates far more
//! traffic than provisioning). The origin guard rejects cross-origin
//! requests whose declared `Origin` is not allow-listed; requests without
//! an `Origin` header (server-to-server) always pass.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::QuotaConfig;

/// Type alias for the keyed rate limiter
type IpLimiter = DefaultKeyedRateLimiter<IpAddr>;

/// Per-IP rate limiter for one route family.
pub struct RequestLimiter {
    enabled: bool,
    limiter: IpLimiter,
    retry_after_secs: u64,
}

impl RequestLimiter {
    /// Build a limiter from a quota config. The quota replenishes evenly
    /// across the window with a burst of the full window allowance.
    #[must_use]
    pub fn new(enabled: bool, config: &QuotaConfig) -> Self {
        let max = NonZeroU32::new(config.max_requests).unwrap_or(NonZeroU32::MIN);
        let period = config
            .window
            .checked_div(config.max_requests.max(1))
            .filter(|p| !p.is_zero())
            .unwrap_or(Duration::from_secs(1));
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(max);

        Self {
            enabled,
            limiter: RateLimiter::keyed(quota),
            retry_after_secs: period.as_secs().max(1),
        }
    }

    /// Try to admit a request from `ip`. Returns false when over quota.
    #[must_use]
    pub fn try_acquire(&self, ip: IpAddr) -> bool {
        if !self.enabled {
            return true;
        }
        self.limiter.check_key(&ip).is_ok()
    }

    /// Hint for the `Retry-After` header.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }
}

/// Rate limiting middleware, attached per route family with its own
/// [`RequestLimiter`].
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RequestLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    if limiter.try_acquire(ip) {
        next.run(request).await
    } else {
        warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
        rate_limited_response(limiter.retry_after_secs())
    }
}

/// Origin allow-list.
pub struct OriginGuard {
    allowed: Vec<String>,
}

impl OriginGuard {
    /// Create a guard. An empty list disables the guard entirely (no
    /// cross-origin callers configured means nothing to reject server-side;
    /// browsers still enforce the absent CORS headers).
    #[must_use]
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Whether a request with the given declared origin may proceed.
    /// Absent origin (server-to-server) always passes.
    #[must_use]
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(o) => self.allowed.is_empty() || self.allowed.iter().any(|a| a == o),
        }
    }
}

/// Origin-guard middleware.
pub async fn origin_guard_middleware(
    State(guard): State<Arc<OriginGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if guard.permits(origin.as_deref()) {
        next.run(request).await
    } else {
        warn!(origin = ?origin, path = %request.uri().path(), "Origin not allowed");
        (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "origin_not_allowed",
                "message": "Cross-origin requests from this origin are not permitted"
            })),
        )
            .into_response()
    }
}

/// CORS response headers for the configured origins.
#[must_use]
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Client IP for rate-limit keying: proxy headers first, then the socket
/// address, then unspecified (all unattributable traffic shares a bucket).
fn client_ip(request: &Request<Body>) -> IpAddr {
    forwarded_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Extract client IP from `X-Forwarded-For` or `X-Real-IP` headers.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Create a 429 response with a retry hint.
fn rate_limited_response(retry_after_secs: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after_secs.to_string())],
        Json(json!({
            "error": "too_many_requests",
            "message": "Rate limit exceeded. Try again later."
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn quota(max_requests: u32, window: Duration) -> QuotaConfig {
        QuotaConfig {
            max_requests,
            window,
        }
    }

    #[test]
    fn limiter_admits_up_to_quota_then_rejects() {
        let limiter = RequestLimiter::new(true, &quota(2, Duration::from_secs(600)));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        // First two requests within the window pass
        assert!(limiter.try_acquire(ip));
        assert!(limiter.try_acquire(ip));
        // Third is rejected
        assert!(!limiter.try_acquire(ip));
    }

    #[test]
    fn limiter_keys_by_ip() {
        let limiter = RequestLimiter::new(true, &quota(1, Duration::from_secs(600)));
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.try_acquire(a));
        assert!(!limiter.try_acquire(a));
        // A different client is unaffected
        assert!(limiter.try_acquire(b));
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RequestLimiter::new(false, &quota(1, Duration::from_secs(600)));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.try_acquire(ip));
        assert!(limiter.try_acquire(ip));
        assert!(limiter.try_acquire(ip));
    }

    #[test]
    fn retry_after_reflects_replenish_period() {
        // 1000 requests per 15 minutes -> replenish about every 0.9s
        let limiter = RequestLimiter::new(true, &quota(1000, Duration::from_secs(900)));
        assert!(limiter.retry_after_secs() >= 1);
    }

    #[test]
    fn origin_guard_passes_absent_origin() {
        let guard = OriginGuard::new(vec!["http://localhost:3000".to_string()]);
        assert!(guard.permits(None));
    }

    #[test]
    fn origin_guard_allows_listed_origin() {
        let guard = OriginGuard::new(vec!["http://localhost:3000".to_string()]);
        assert!(guard.permits(Some("http://localhost:3000")));
    }

    #[test]
    fn origin_guard_rejects_unlisted_origin() {
        let guard = OriginGuard::new(vec!["http://localhost:3000".to_string()]);
        assert!(!guard.permits(Some("https://evil.example.com")));
    }

    #[test]
    fn empty_allow_list_disables_guard() {
        let guard = OriginGuard::new(Vec::new());
        assert!(guard.permits(Some("https://anywhere.example.com")));
    }

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            forwarded_ip(&headers),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(
            forwarded_ip(&headers),
            Some("198.51.100.4".parse().unwrap())
        );
    }
}
