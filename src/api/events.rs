use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{
    ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, SlugTable, deleted, is_slug_conflict,
    like_pattern, non_blank, unique_slug,
};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::AuthUser;
use crate::auth::roles::{self, PASTORAL, PUBLISHERS};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// `true` = starting now or later, `false` = already started.
    pub upcoming: Option<bool>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct EventResponse {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, title, slug, description, location, starts_at, ends_at, image_url, \
                       created_by, created_at, updated_at";

const FILTER: &str = r"
    ($1::bool IS NULL OR ($1 AND starts_at >= now()) OR (NOT $1 AND starts_at < now()))
    AND ($2::text IS NULL OR title ILIKE $2 OR description ILIKE $2 OR location ILIKE $2)
    AND ($3::timestamptz IS NULL OR starts_at >= $3)
    AND ($4::timestamptz IS NULL OR starts_at <= $4)
";

/// Past events read most-recent first; everything else soonest first.
fn order_clause(upcoming: Option<bool>) -> &'static str {
    match upcoming {
        Some(false) => "starts_at DESC",
        _ => "starts_at ASC",
    }
}

fn validate(body: &CreateEventRequest) -> Result<(), ApiError> {
    validation::check_required("title", &body.title, 200)?;
    validation::check_optional("description", body.description.as_deref(), 20_000)?;
    validation::check_optional("location", body.location.as_deref(), 255)?;
    if let Some(ref url) = body.image_url {
        validation::check_url("image_url", url)?;
    }
    if let Some(ends_at) = body.ends_at
        && ends_at < body.starts_at
    {
        return Err(ApiError::BadRequest("ends_at must not precede starts_at".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/events/create", post(create_event))
        .route("/api/events/get", get(list_events))
        .route("/api/events/get/{id}", get(get_event))
        .route("/api/events/delete/{id}", delete(delete_event))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(title = %body.title), err)]
async fn create_event(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    roles::require_any_role(&auth, PUBLISHERS)?;
    validate(&body)?;

    // A concurrent create can take the slug first; derive a fresh one once.
    let mut retried = false;
    let event = loop {
        let slug = unique_slug(&state.pool, SlugTable::Events, &body.title).await?;
        let inserted = sqlx::query_as::<_, EventResponse>(&format!(
            "INSERT INTO events (title, slug, description, location, starts_at, ends_at, image_url, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {COLUMNS}"
        ))
        .bind(body.title.trim())
        .bind(&slug)
        .bind(&body.description)
        .bind(non_blank(body.location.as_ref()))
        .bind(body.starts_at)
        .bind(body.ends_at)
        .bind(&body.image_url)
        .bind(auth.user_id)
        .fetch_one(&state.pool)
        .await;
        match inserted {
            Err(e) if !retried && is_slug_conflict(&e) => retried = true,
            other => break other?,
        }
    };

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "event.create", "event")
            .resource_id(event.id)
            .detail(serde_json::json!({ "slug": event.slug, "starts_at": event.starts_at })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(event)))
}

async fn list_events(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<EventFilter>,
) -> Result<Json<ListResponse<EventResponse>>, ApiError> {
    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM events WHERE {FILTER}"))
        .bind(filter.upcoming)
        .bind(&search)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&state.pool)
        .await?;

    let items = sqlx::query_as::<_, EventResponse>(&format!(
        "SELECT {COLUMNS} FROM events WHERE {FILTER}
         ORDER BY {} LIMIT $5 OFFSET $6",
        order_clause(filter.upcoming)
    ))
    .bind(filter.upcoming)
    .bind(&search)
    .bind(filter.from)
    .bind(filter.to)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

/// Look up by id or slug. A key that is both (a UUID-shaped title) prefers the id match.
async fn get_event(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> Result<Json<EventResponse>, ApiError> {
    let id = Uuid::parse_str(&key).ok();
    let row = sqlx::query_as::<_, EventResponse>(&format!(
        "SELECT {COLUMNS} FROM events WHERE id = $1 OR slug = $2
         ORDER BY id IS NOT DISTINCT FROM $1 DESC LIMIT 1"
    ))
    .bind(id)
    .bind(&key)
    .fetch_optional(&state.pool)
    .await?;

    row.map(Json).ok_or_else(|| ApiError::NotFound("event".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_event(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let result = sqlx::query("DELETE FROM events WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("event".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "event.delete", "event").resource_id(id),
    )
    .await;

    Ok(deleted())
}
