use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, deleted, non_blank};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::{AuthUser, ClientIp};
use crate::auth::{rate_limit, token};
use crate::auth::roles::{self, PASTORAL};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

#[derive(Debug, Deserialize)]
pub struct CreateAnonymousRequest {
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AnonymousResponse {
    pub id: Uuid,
    pub subject: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/anonymous/create", post(create_message))
        .route("/api/anonymous/get", get(list_messages))
        .route("/api/anonymous/get/{id}", get(get_message))
        .route("/api/anonymous/delete/{id}", delete(delete_message))
}

/// Public endpoint. Nothing about the sender is stored; the rate limiter
/// keys on a hash of the caller address, never the address itself.
async fn create_message(
    State(state): State<AppState>,
    ip: ClientIp,
    ApiJson(body): ApiJson<CreateAnonymousRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = token::hash_token(ip.key());
    rate_limit::check_rate(&state.valkey, "anonymous", &caller, 20, 3600).await?;

    validation::check_required("message", &body.message, 5000)?;
    validation::check_optional("subject", body.subject.as_deref(), 200)?;

    let message = sqlx::query_as::<_, AnonymousResponse>(
        "INSERT INTO anonymous_messages (subject, message) VALUES ($1, $2)
         RETURNING id, subject, message, created_at",
    )
    .bind(non_blank(body.subject.as_ref()))
    .bind(&body.message)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(id = %message.id, "anonymous message received");

    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
) -> Result<Json<ListResponse<AnonymousResponse>>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anonymous_messages")
        .fetch_one(&state.pool)
        .await?;

    let items = sqlx::query_as::<_, AnonymousResponse>(
        "SELECT id, subject, message, created_at FROM anonymous_messages
         ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

async fn get_message(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<AnonymousResponse>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    sqlx::query_as::<_, AnonymousResponse>(
        "SELECT id, subject, message, created_at FROM anonymous_messages WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("message".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let result = sqlx::query("DELETE FROM anonymous_messages WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("message".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "anonymous.delete", "anonymous_message").resource_id(id),
    )
    .await;

    Ok(deleted())
}
