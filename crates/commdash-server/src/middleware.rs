//! Request middleware for the pipeline management API.
//!
//! Rejections reuse the handler error envelope from [`crate::api`], so
//! dashboard clients parse one error shape whether a request dies here or
//! in a handler.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::ApiError;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Axum middleware that extracts or generates a request ID.
///
/// An incoming `x-request-id` header is reused so a pipeline operation can
/// be traced from the dashboard through this service; otherwise a fresh
/// `UUIDv4` is minted. The ID lands in request extensions as [`RequestId`]
/// and is echoed on the response header.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// The request ID planted by [`request_id`], which runs outermost.
fn request_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map_or_else(|| "unknown".to_string(), |id| id.0.clone())
}

/// API key auth settings for the pipeline endpoints.
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<HashSet<String>>,
    pub enabled: bool,
}

impl AuthState {
    /// Builds auth config from `COMMDASH_API_KEYS` (comma-separated bearer
    /// tokens).
    ///
    /// Development runs with auth disabled when no keys are configured;
    /// every other environment refuses to start without them.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let keys = parse_key_list(&std::env::var("COMMDASH_API_KEYS").unwrap_or_default());

        if keys.is_empty() {
            if !is_development {
                anyhow::bail!(
                    "COMMDASH_API_KEYS is required outside development; provide comma-separated bearer tokens"
                );
            }
            tracing::warn!(
                "COMMDASH_API_KEYS not set; bearer auth disabled in development environment"
            );
        }

        Ok(Self {
            enabled: !keys.is_empty(),
            api_keys: Arc::new(keys),
        })
    }
}

fn parse_key_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Middleware enforcing Bearer token auth when enabled.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    match bearer_token(&req) {
        Some(token) if auth.api_keys.contains(token) => next.run(req).await,
        _ => ApiError::new(
            request_id_of(&req),
            "unauthorized",
            "missing or invalid bearer token",
        )
        .into_response(),
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug)]
struct ClientWindow {
    started_at: Instant,
    count: usize,
}

/// Fixed-window rate limiter keyed per client.
///
/// Clients are distinguished by bearer token, so one busy dashboard
/// instance running bulk-setup cannot starve the others out of status
/// polling. Unauthenticated development traffic shares one bucket.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    clients: Arc<Mutex<HashMap<String, ClientWindow>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records one request for `client` and reports whether it fits the
    /// window budget. Expired windows are dropped on the way through,
    /// bounding the map by clients active in the current window.
    async fn admit(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        clients.retain(|_, w| now.duration_since(w.started_at) < self.window);

        let window = clients.entry(client.to_string()).or_insert(ClientWindow {
            started_at: now,
            count: 0,
        });
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }
}

/// Middleware enforcing the per-client request budget.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    // Tokens were already checked by the auth layer; here they only key
    // the window and are never logged.
    let client = bearer_token(&req).unwrap_or("anonymous").to_string();

    if rate_limit.admit(&client).await {
        next.run(req).await
    } else {
        tracing::warn!("rate limit window exhausted for a client");
        ApiError::new(request_id_of(&req), "rate_limited", "rate limit exceeded").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: &str) -> Request {
        Request::builder()
            .header(AUTHORIZATION, value)
            .body(Body::empty())
            .expect("request")
    }

    #[test]
    fn bearer_token_accepts_valid_header() {
        let req = request_with_auth("Bearer test-token");
        assert_eq!(bearer_token(&req), Some("test-token"));
    }

    #[test]
    fn bearer_token_rejects_non_bearer_header() {
        let req = request_with_auth("Basic abc123");
        assert_eq!(bearer_token(&req), None);

        let blank = request_with_auth("Bearer   ");
        assert_eq!(bearer_token(&blank), None);
    }

    #[test]
    fn parse_key_list_trims_and_drops_empties() {
        let keys = parse_key_list(" alpha , ,beta,,");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("alpha"));
        assert!(keys.contains("beta"));

        assert!(parse_key_list("").is_empty());
    }

    #[test]
    fn auth_state_disables_when_no_keys_in_dev() {
        std::env::remove_var("COMMDASH_API_KEYS");
        let state = AuthState::from_env(true).expect("dev should allow missing keys");
        assert!(!state.enabled);
    }

    #[tokio::test]
    async fn rate_limit_isolates_clients() {
        let limiter = RateLimitState::new(2, Duration::from_secs(60));

        assert!(limiter.admit("dashboard-a").await);
        assert!(limiter.admit("dashboard-a").await);
        assert!(
            !limiter.admit("dashboard-a").await,
            "third request should be over budget"
        );

        // A different client has its own window.
        assert!(limiter.admit("dashboard-b").await);
    }

    #[tokio::test]
    async fn rate_limit_window_expiry_resets_the_budget() {
        let limiter = RateLimitState::new(1, Duration::ZERO);

        assert!(limiter.admit("dashboard-a").await);
        assert!(
            limiter.admit("dashboard-a").await,
            "zero-length window expires immediately"
        );
    }
}
