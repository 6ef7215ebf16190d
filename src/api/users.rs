use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, deleted};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::{AuthUser, ClientIp, SESSION_COOKIE};
use crate::auth::roles::{self, Role, RoleFlags};
use crate::auth::{password, rate_limit, token};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

const SESSION_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRolesRequest {
    pub is_admin: Option<bool>,
    pub is_pastor: Option<bool>,
    pub is_dept_head: Option<bool>,
    pub is_member: Option<bool>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersParams {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub roles: RoleFlags,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(sqlx::FromRow)]
struct LoginLookup {
    password_hash: String,
    #[sqlx(flatten)]
    user: UserResponse,
}

const USER_COLUMNS: &str = "id, name, email, phone, department, is_admin, is_pastor, \
                            is_dept_head, is_member, is_active, created_at, updated_at";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/users/get", get(list_users))
        .route("/api/users/get/{id}", get(get_user))
        .route("/api/users/roles/{id}", patch(update_roles))
        .route("/api/users/delete/{id}", delete(deactivate_user))
}

// ---------------------------------------------------------------------------
// Auth handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body, ip), fields(email = %body.email), err)]
async fn register(
    State(state): State<AppState>,
    ip: ClientIp,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit::check_rate(&state.valkey, "register", ip.key(), 10, 3600).await?;

    validation::check_required("name", &body.name, 255)?;
    validation::check_email(&body.email)?;
    validation::check_length("password", &body.password, 8, 1024)?;
    if let Some(ref phone) = body.phone {
        validation::check_phone(phone)?;
    }
    validation::check_optional("department", body.department.as_deref(), 255)?;

    let hash = password::hash_password(&body.password).map_err(ApiError::Internal)?;

    let user = sqlx::query_as::<_, UserResponse>(&format!(
        "INSERT INTO users (name, email, phone, department, password_hash, is_member)
         VALUES ($1, lower($2), $3, $4, $5, true)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(body.name.trim())
    .bind(body.email.trim())
    .bind(&body.phone)
    .bind(&body.department)
    .bind(&hash)
    .fetch_one(&state.pool)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::Conflict("email already registered".into()),
        other => other,
    })?;

    write_audit(
        &state.pool,
        AuditEntry {
            actor_id: Some(user.id),
            actor_name: &user.name,
            action: "user.register",
            resource: "user",
            resource_id: Some(user.id),
            detail: None,
            ip_addr: ip.0.as_deref(),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(user)))
}

#[tracing::instrument(skip(state, body, ip), fields(email = %body.email), err)]
async fn login(
    State(state): State<AppState>,
    ip: ClientIp,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = body.email.trim().to_lowercase();

    // 10 attempts per 5 minutes per account
    rate_limit::check_rate(&state.valkey, "login", &email, 10, 300).await?;

    let found = sqlx::query_as::<_, LoginLookup>(&format!(
        "SELECT password_hash, {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    // Always run argon2, even for unknown emails
    let (hash_to_verify, user) = match found {
        Some(f) => (f.password_hash, Some(f.user)),
        None => (password::dummy_hash().to_owned(), None),
    };

    let password_valid =
        password::verify_password(&body.password, &hash_to_verify).map_err(ApiError::Internal)?;

    let user = match user {
        Some(u) if password_valid && u.is_active => u,
        _ => return Err(ApiError::Unauthorized),
    };

    let (raw_token, token_hash) = token::generate_session_token();
    let expires_at = Utc::now() + Duration::hours(SESSION_HOURS);

    sqlx::query("INSERT INTO auth_sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
        .bind(user.id)
        .bind(&token_hash)
        .bind(expires_at)
        .execute(&state.pool)
        .await?;

    write_audit(
        &state.pool,
        AuditEntry {
            actor_id: Some(user.id),
            actor_name: &user.name,
            action: "auth.login",
            resource: "session",
            resource_id: None,
            detail: None,
            ip_addr: ip.0.as_deref(),
        },
    )
    .await;

    let cookie = session_cookie(&raw_token, SESSION_HOURS * 3600, state.config.secure_cookies);

    Ok((
        StatusCode::OK,
        [(axum::http::header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            token: raw_token,
            expires_at,
            user,
        }),
    ))
}

fn session_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure_flag}")
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id), err)]
async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    // Logs out every device of this user
    sqlx::query("DELETE FROM auth_sessions WHERE user_id = $1")
        .bind(auth.user_id)
        .execute(&state.pool)
        .await?;

    write_audit(&state.pool, AuditEntry::by(&auth, "auth.logout", "session")).await;

    let cookie = session_cookie("", 0, state.config.secure_cookies);
    Ok((
        StatusCode::OK,
        [(axum::http::header::SET_COOKIE, cookie)],
        Json(serde_json::json!({"ok": true})),
    ))
}

async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<UserResponse>, ApiError> {
    let user = fetch_user(&state, auth.user_id).await?;
    Ok(Json(user))
}

async fn fetch_user(state: &AppState, id: Uuid) -> Result<UserResponse, ApiError> {
    sqlx::query_as::<_, UserResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("user".into()))
}

// ---------------------------------------------------------------------------
// User administration
// ---------------------------------------------------------------------------

async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(params): ApiQuery<ListUsersParams>,
) -> Result<Json<ListResponse<UserResponse>>, ApiError> {
    roles::require_any_role(&auth, roles::ADMIN_ONLY)?;

    let role = params.role.map(Role::as_str);
    let search = crate::api::helpers::non_blank(params.search.as_ref())
        .map(|s| crate::api::helpers::like_pattern(&s));

    let filter = r"
        ($1::text IS NULL
            OR ($1 = 'admin' AND is_admin)
            OR ($1 = 'pastor' AND is_pastor)
            OR ($1 = 'dept_head' AND is_dept_head)
            OR ($1 = 'member' AND is_member))
        AND ($2::text IS NULL OR name ILIKE $2 OR email ILIKE $2)
    ";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM users WHERE {filter}"))
        .bind(role)
        .bind(&search)
        .fetch_one(&state.pool)
        .await?;

    let items = sqlx::query_as::<_, UserResponse>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {filter}
         ORDER BY created_at DESC LIMIT $3 OFFSET $4"
    ))
    .bind(role)
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    if auth.user_id != id {
        roles::require_any_role(&auth, roles::ADMIN_ONLY)?;
    }
    Ok(Json(fetch_user(&state, id).await?))
}

#[tracing::instrument(skip(state, body), fields(%id), err)]
async fn update_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<UpdateRolesRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    roles::require_any_role(&auth, roles::ADMIN_ONLY)?;
    validation::check_optional("department", body.department.as_deref(), 255)?;

    if id == auth.user_id && body.is_admin == Some(false) {
        return Err(ApiError::BadRequest("cannot remove your own admin role".into()));
    }

    let user = sqlx::query_as::<_, UserResponse>(&format!(
        "UPDATE users SET
            is_admin = COALESCE($2, is_admin),
            is_pastor = COALESCE($3, is_pastor),
            is_dept_head = COALESCE($4, is_dept_head),
            is_member = COALESCE($5, is_member),
            department = COALESCE($6, department)
         WHERE id = $1
         RETURNING {USER_COLUMNS}"
    ))
    .bind(id)
    .bind(body.is_admin)
    .bind(body.is_pastor)
    .bind(body.is_dept_head)
    .bind(body.is_member)
    .bind(&body.department)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("user".into()))?;

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "user.roles", "user")
            .resource_id(id)
            .detail(serde_json::json!({ "roles": user.roles.roles() })),
    )
    .await;

    Ok(Json(user))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn deactivate_user(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, roles::ADMIN_ONLY)?;

    if id == auth.user_id {
        return Err(ApiError::BadRequest("cannot deactivate yourself".into()));
    }

    let result = sqlx::query("UPDATE users SET is_active = false WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("user".into()));
    }

    sqlx::query("DELETE FROM auth_sessions WHERE user_id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "user.deactivate", "user").resource_id(id),
    )
    .await;

    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let c = session_cookie("chs_abc", 86400, false);
        assert_eq!(
            c,
            "session=chs_abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400"
        );
    }

    #[test]
    fn session_cookie_secure_flag() {
        assert!(session_cookie("x", 10, true).ends_with("; Secure"));
    }

    #[test]
    fn list_params_parse_role() {
        let params: ListUsersParams =
            serde_json::from_value(serde_json::json!({"role": "dept_head"})).unwrap();
        assert_eq!(params.role, Some(Role::DeptHead));
        assert!(params.search.is_none());
    }
}
