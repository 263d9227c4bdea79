//! HTTP middleware for the host surface.
//!
//! Authentication is principal extraction, not a gate: the middleware
//! decodes a bearer JWT (HS256) into a [`RequestPrincipal`] and stashes it in
//! request extensions. Per-route protection is composed explicitly by
//! extensions (`RequireAuth` / `RequireRole` in the route table) and by the
//! management handlers (admin role on mutations); there is no ambient auth.

use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::host_error::HostError;
use crate::server::AppState;

/// The authenticated caller, as seen by route gates and handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPrincipal {
    pub user_id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl RequestPrincipal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// JWT claims carried by management and extension callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    pub iat: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Mint a token for the given principal. Used by operators and tests; the
/// host itself never issues tokens (identity is an external service).
pub fn encode_token(
    secret: &str,
    user_id: &str,
    email: Option<&str>,
    roles: &[&str],
    ttl_secs: u64,
) -> Result<String, HostError> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + ttl_secs,
        iat: now,
        email: email.map(str::to_string),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| HostError::config(format!("cannot encode token: {e}")))
}

fn decode_principal(secret: &str, token: &str) -> Result<RequestPrincipal, HostError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|_| HostError::Unauthorized)?;

    Ok(RequestPrincipal {
        user_id: data.claims.sub,
        email: data.claims.email,
        roles: data.claims.roles,
    })
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Decode the bearer token (when present) into a [`RequestPrincipal`].
///
/// With auth enabled, a malformed or expired token is a hard 401; with auth
/// disabled the request simply proceeds unauthenticated and protected routes
/// reject it downstream.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req) {
        match decode_principal(&state.config.auth.jwt_secret, token) {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
            }
            Err(err) if state.config.auth.enabled => return err.into_response(),
            Err(_) => {}
        }
    }
    next.run(req).await
}

/// Request/response log line with latency as structured fields.
pub async fn logging_middleware(
    State(_state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let user = req
        .extensions()
        .get::<RequestPrincipal>()
        .map(|p| p.user_id.clone());

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        latency_ms = start.elapsed().as_millis() as u64,
        user = user.as_deref().unwrap_or("-"),
        "request processed"
    );
    response
}

/// Gate for management mutations: with auth enabled the caller must hold the
/// `admin` role.
pub fn require_admin(
    auth_enabled: bool,
    principal: Option<&RequestPrincipal>,
) -> Result<(), HostError> {
    if !auth_enabled {
        return Ok(());
    }
    match principal {
        None => Err(HostError::Unauthorized),
        Some(p) if p.has_role("admin") => Ok(()),
        Some(_) => Err(HostError::RoleRequired {
            role: "admin".to_string(),
        }),
    }
}
