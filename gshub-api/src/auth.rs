use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use gshub_common::UserRole;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::app::AppState;
use crate::error::ApiError;

/// Principal extracted from a session token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String, // user id
    email: String,
    role: UserRole,
    iat: usize,
    exp: usize,
}

pub fn jwt_secret() -> String {
    // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
    std::env::var("JWT_SECRET_FILE")
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .or_else(|| std::env::var("JWT_SECRET").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "dev_insecure_change_me".to_string())
}

pub fn jwt_issuer() -> String {
    std::env::var("JWT_ISSUER")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "gshub-api".to_string())
}

pub fn jwt_ttl_seconds() -> u64 {
    std::env::var("JWT_TTL_SECONDS")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60 * 60 * 12) // 12h
}

pub fn session_cookie_name() -> String {
    std::env::var("SESSION_COOKIE_NAME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "gshub_session".to_string())
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issue a session token. Login itself lives outside this service; this is used by tooling and
/// tests.
pub fn sign_session_jwt(user: &AuthUser) -> anyhow::Result<String> {
    let now = now_ts();
    let claims = Claims {
        iss: jwt_issuer(),
        sub: user.user_id.to_string(),
        email: user.email.clone(),
        role: user.role,
        iat: now as usize,
        exp: (now + jwt_ttl_seconds()) as usize,
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret().as_bytes()),
    )?;
    Ok(token)
}

fn decode_session_jwt(token: &str) -> anyhow::Result<AuthUser> {
    let mut validation = Validation::default();
    validation.set_issuer(&[jwt_issuer()]);

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret().as_bytes()),
        &validation,
    )?;
    Ok(AuthUser {
        user_id: data.claims.sub.parse()?,
        email: data.claims.email,
        role: data.claims.role,
    })
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = auth.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE).and_then(|v| v.to_str().ok())?;
    for part in raw.split(';') {
        let mut it = part.trim().splitn(2, '=');
        let k = it.next()?.trim();
        let v = it.next().unwrap_or("").trim();
        if k == name && !v.is_empty() {
            return Some(v.to_string());
        }
    }
    None
}

pub fn current_user_from_headers(headers: &HeaderMap) -> anyhow::Result<AuthUser> {
    // Prefer cookie (browser sessions), fallback to Authorization Bearer (API clients).
    let token = extract_cookie(headers, &session_cookie_name())
        .or_else(|| extract_bearer(headers))
        .ok_or_else(|| anyhow::anyhow!("missing_token"))?;
    decode_session_jwt(&token)
}

/// Middleware: a valid session token is required; inserts `AuthUser` into request extensions.
pub async fn require_user(mut req: Request<Body>, next: Next) -> Response {
    match current_user_from_headers(req.headers()) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!("session rejected: {}", e);
            ApiError::Unauthorized("unauthorized").into_response()
        }
    }
}

pub fn require_admin(user: &AuthUser) -> Result<(), ApiError> {
    if user.role == UserRole::Admin {
        Ok(())
    } else {
        tracing::info!("[{}] admin_required", user.email);
        Err(ApiError::Forbidden("admin_required"))
    }
}

/// Middleware for instance callbacks. When a callback token is configured the caller must
/// present it as a Bearer token; otherwise callbacks are open (private network deployments).
pub async fn require_instance_token(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.callback_token.as_deref() else {
        return next.run(req).await;
    };
    match extract_bearer(req.headers()) {
        Some(token) if token == expected => next.run(req).await,
        _ => ApiError::Unauthorized("invalid_instance_token").into_response(),
    }
}
