//! Shared-password login, session tokens and the guard on `/api` and `/ws`.
//!
//! A token is base64 of `{"timestamp": <millis>, "digest": <hex>}` where the
//! digest is `sha256("<password>:<timestamp>")`. It carries no secret, expires
//! after the configured TTL, and stops validating as soon as the password
//! changes.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

pub const AUTH_COOKIE: &str = "auth_token";

/// Path prefix that stays reachable without a token.
const PUBLIC_PREFIX: &str = "/api/auth";

/// WebSocket endpoint; it pushes the full task list.
const WS_PATH: &str = "/ws";

/// Minutes a token may be stamped in the future before it is rejected.
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct AuthSettings {
    pub password: String,
    pub token_ttl: TimeDelta,
    pub secure_cookies: bool,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("password", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

impl AuthSettings {
    pub fn new(password: impl Into<String>, ttl_hours: u32) -> Self {
        Self {
            password: password.into(),
            token_ttl: TimeDelta::hours(i64::from(ttl_hours)),
            secure_cookies: false,
        }
    }

    /// Constant-time comparison against the configured password.
    /// An empty configured password never matches.
    pub fn check_password(&self, candidate: &str) -> bool {
        !self.password.is_empty()
            && bool::from(self.password.as_bytes().ct_eq(candidate.as_bytes()))
    }

    pub fn issue(&self) -> String {
        issue_token(&self.password, Utc::now())
    }

    pub fn validate(&self, token: &str) -> bool {
        !self.password.is_empty()
            && validate_token(token, &self.password, self.token_ttl, Utc::now())
    }

    /// `Set-Cookie` value carrying a freshly issued token.
    pub fn cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Strict; Max-Age={}; Path=/",
            AUTH_COOKIE,
            token,
            self.token_ttl.num_seconds()
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    timestamp: i64,
    digest: String,
}

fn digest(password: &str, timestamp: i64) -> String {
    format!(
        "{:x}",
        Sha256::digest(format!("{}:{}", password, timestamp).as_bytes())
    )
}

pub fn issue_token(password: &str, now: DateTime<Utc>) -> String {
    let timestamp = now.timestamp_millis();
    let claims = serde_json::json!({
        "timestamp": timestamp,
        "digest": digest(password, timestamp),
    });
    STANDARD.encode(claims.to_string())
}

pub fn validate_token(token: &str, password: &str, ttl: TimeDelta, now: DateTime<Utc>) -> bool {
    let Ok(raw) = STANDARD.decode(token.trim()) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<TokenClaims>(&raw) else {
        return false;
    };
    let Some(issued) = DateTime::<Utc>::from_timestamp_millis(claims.timestamp) else {
        return false;
    };

    let age = now.signed_duration_since(issued);
    if age > ttl || age < -TimeDelta::minutes(MAX_CLOCK_SKEW_MINUTES) {
        return false;
    }

    let expected = digest(password, claims.timestamp);
    bool::from(expected.as_bytes().ct_eq(claims.digest.as_bytes()))
}

/// Token from the `auth_token` cookie, falling back to a bearer header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
    })
}

fn requires_authentication(path: &str) -> bool {
    path == WS_PATH || (path.starts_with("/api/") && !path.starts_with(PUBLIC_PREFIX))
}

/// Reject `/api/*` and `/ws` requests without a valid token, except the auth
/// endpoints.
pub async fn require_auth(
    State(auth): State<AuthSettings>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !requires_authentication(path) {
        return next.run(request).await;
    }

    match token_from_headers(request.headers()) {
        Some(token) if auth.validate(&token) => {
            debug!(path = %path, "Token accepted");
            next.run(request).await
        }
        Some(_) => {
            warn!(path = %path, "Rejected expired or invalid token");
            unauthorized()
        }
        None => {
            warn!(path = %path, "Missing auth token");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "message": "Unauthorized" })),
    )
        .into_response()
}
