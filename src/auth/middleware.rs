use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::roles::RoleFlags;
use crate::auth::token;
use crate::error::ApiError;
use crate::store::AppState;

pub const SESSION_COOKIE: &str = "session";

/// Authenticated user extracted from the bearer token or session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub user_name: String,
    pub email: String,
    pub roles: RoleFlags,
    pub ip_addr: Option<String>,
}

/// Row returned when looking up a session.
#[derive(sqlx::FromRow)]
struct SessionAuthLookup {
    user_id: Uuid,
    user_name: String,
    email: String,
    is_active: bool,
    #[sqlx(flatten)]
    roles: RoleFlags,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip_addr = extract_ip(parts, state.config.trust_proxy_headers);

        // Bearer header wins over the cookie when both are present
        let raw_token = extract_bearer_token(parts)
            .or_else(|| extract_session_cookie(parts))
            .ok_or(ApiError::Unauthorized)?;

        let user = lookup_session(&state.pool, &raw_token)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if !user.is_active {
            return Err(ApiError::Unauthorized);
        }

        Ok(Self {
            user_id: user.user_id,
            user_name: user.user_name,
            email: user.email,
            roles: user.roles,
            ip_addr,
        })
    }
}

/// Caller address for unauthenticated endpoints (rate limiting).
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(extract_ip(parts, state.config.trust_proxy_headers)))
    }
}

impl ClientIp {
    /// Identifier used as the rate-limit key.
    pub fn key(&self) -> &str {
        self.0.as_deref().unwrap_or("unknown")
    }
}

fn extract_bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_owned())
}

fn extract_session_cookie(parts: &Parts) -> Option<String> {
    let cookies = parts
        .headers
        .get(axum::http::header::COOKIE)?
        .to_str()
        .ok()?;
    for cookie in cookies.split(';') {
        if let Some((name, value)) = cookie.trim().split_once('=')
            && name == SESSION_COOKIE
            && !value.is_empty()
        {
            return Some(value.to_owned());
        }
    }
    None
}

fn extract_ip(parts: &Parts, trust_proxy: bool) -> Option<String> {
    // X-Forwarded-For is only honoured behind a configured reverse proxy
    if trust_proxy
        && let Some(forwarded) = parts.headers.get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(first_ip) = val.split(',').next()
    {
        return Some(first_ip.trim().to_owned());
    }
    parts
        .extensions
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

async fn lookup_session(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<SessionAuthLookup>, ApiError> {
    let hash = token::hash_token(raw_token);

    let row = sqlx::query_as::<_, SessionAuthLookup>(
        r"
        SELECT u.id AS user_id, u.name AS user_name, u.email, u.is_active,
               u.is_admin, u.is_pastor, u.is_dept_head, u.is_member
        FROM auth_sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1
          AND s.expires_at > now()
        ",
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
