use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::helpers::{ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, deleted, non_blank};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::AuthUser;
use crate::auth::roles::{self, PASTORAL};
use crate::error::ApiError;
use crate::notify::broadcast::{self, BroadcastMessage, COLUMNS, SweepReport};
use crate::store::AppState;
use crate::validation;

/// Six concatenated SMS segments.
pub const MAX_MESSAGE_CHARS: usize = 918;

const STATUSES: &[&str] = &["pending", "sending", "sent", "failed"];

#[derive(Debug, Deserialize)]
pub struct CreateBroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub to_all_members: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastFilter {
    pub status: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/broadcasts/create", post(create_broadcast))
        .route("/api/broadcasts/get", get(list_broadcasts))
        .route("/api/broadcasts/get/{id}", get(get_broadcast))
        .route("/api/broadcasts/delete/{id}", delete(delete_broadcast))
        .route("/api/broadcasts/send-scheduled", post(send_scheduled))
}

/// A schedule at or before `now` means "send immediately".
fn is_deferred(scheduled_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    scheduled_at.is_some_and(|at| at > now)
}

/// Phone numbers of every active member, deduplicated.
async fn member_phones(pool: &sqlx::PgPool) -> Result<Vec<String>, ApiError> {
    let phones: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT phone FROM users
         WHERE is_member AND is_active AND phone IS NOT NULL AND phone <> ''
         ORDER BY phone",
    )
    .fetch_all(pool)
    .await?;
    Ok(phones)
}

#[tracing::instrument(skip(state, body), fields(user_id = %auth.user_id), err)]
async fn create_broadcast(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateBroadcastRequest>,
) -> Result<impl IntoResponse, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;
    validation::check_required("message", &body.message, MAX_MESSAGE_CHARS)?;

    let recipients = if body.to_all_members {
        let phones = member_phones(&state.pool).await?;
        if phones.is_empty() {
            return Err(ApiError::BadRequest(
                "no active members have a phone number".into(),
            ));
        }
        phones
    } else {
        let trimmed: Vec<String> = body.recipients.iter().map(|r| r.trim().to_owned()).collect();
        validation::check_recipients(&trimmed)?;
        trimmed
    };

    let deferred = is_deferred(body.scheduled_at, Utc::now());

    let row = sqlx::query_as::<_, BroadcastMessage>(&format!(
        "INSERT INTO broadcast_messages (message, recipients, status, scheduled_at, created_by, claimed_at)
         VALUES ($1, $2, $3, $4, $5, CASE WHEN $3 = 'sending' THEN now() END)
         RETURNING {COLUMNS}"
    ))
    .bind(&body.message)
    .bind(&recipients)
    .bind(if deferred { "pending" } else { "sending" })
    .bind(body.scheduled_at)
    .bind(auth.user_id)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "broadcast.create", "broadcast")
            .resource_id(row.id)
            .detail(serde_json::json!({
                "recipients": recipients.len(),
                "scheduled_at": body.scheduled_at,
            })),
    )
    .await;

    let row = if deferred {
        row
    } else {
        broadcast::deliver(&state.pool, &state.sms, row.id, &recipients, &body.message).await?
    };

    Ok((StatusCode::CREATED, Json(row)))
}

async fn list_broadcasts(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<BroadcastFilter>,
) -> Result<Json<ListResponse<BroadcastMessage>>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let status = non_blank(filter.status.as_ref());
    if let Some(ref s) = status
        && !STATUSES.contains(&s.as_str())
    {
        return Err(ApiError::BadRequest(format!("unknown status '{s}'")));
    }

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM broadcast_messages WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(&status)
    .fetch_one(&state.pool)
    .await?;

    let items = sqlx::query_as::<_, BroadcastMessage>(&format!(
        "SELECT {COLUMNS} FROM broadcast_messages
         WHERE ($1::text IS NULL OR status = $1)
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(&status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

async fn get_broadcast(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<BroadcastMessage>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    sqlx::query_as::<_, BroadcastMessage>(&format!(
        "SELECT {COLUMNS} FROM broadcast_messages WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("broadcast".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_broadcast(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let result = sqlx::query("DELETE FROM broadcast_messages WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("broadcast".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "broadcast.delete", "broadcast").resource_id(id),
    )
    .await;

    Ok(deleted())
}

#[tracing::instrument(skip(state), fields(user_id = %auth.user_id), err)]
async fn send_scheduled(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SweepReport>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;
    let report = broadcast::send_due_broadcasts(&state.pool, &state.sms).await?;
    Ok(Json(report))
}
