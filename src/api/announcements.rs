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
pub struct CreateAnnouncementRequest {
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnnouncementFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AnnouncementResponse {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub body: String,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, title, slug, body, category, image_url, created_by, created_at, updated_at";

// Every filter is optional; a NULL bind disables its clause.
const FILTER: &str = r"
    ($1::text IS NULL OR category = $1)
    AND ($2::text IS NULL OR title ILIKE $2 OR body ILIKE $2)
    AND ($3::timestamptz IS NULL OR created_at >= $3)
    AND ($4::timestamptz IS NULL OR created_at <= $4)
";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/announcements/create", post(create_announcement))
        .route("/api/announcements/get", get(list_announcements))
        .route("/api/announcements/get/{id}", get(get_announcement))
        .route("/api/announcements/delete/{id}", delete(delete_announcement))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(title = %body.title), err)]
async fn create_announcement(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateAnnouncementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    roles::require_any_role(&auth, PUBLISHERS)?;

    validation::check_required("title", &body.title, 200)?;
    validation::check_required("body", &body.body, 20_000)?;
    validation::check_optional("category", body.category.as_deref(), 100)?;
    if let Some(ref url) = body.image_url {
        validation::check_url("image_url", url)?;
    }

    // A concurrent create can take the slug first; derive a fresh one once.
    let mut retried = false;
    let announcement = loop {
        let slug = unique_slug(&state.pool, SlugTable::Announcements, &body.title).await?;
        let inserted = sqlx::query_as::<_, AnnouncementResponse>(&format!(
            "INSERT INTO announcements (title, slug, body, category, image_url, created_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        ))
        .bind(body.title.trim())
        .bind(&slug)
        .bind(&body.body)
        .bind(non_blank(body.category.as_ref()))
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
        AuditEntry::by(&auth, "announcement.create", "announcement")
            .resource_id(announcement.id)
            .detail(serde_json::json!({ "slug": announcement.slug })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(announcement)))
}

async fn list_announcements(
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<AnnouncementFilter>,
) -> Result<Json<ListResponse<AnnouncementResponse>>, ApiError> {
    let category = non_blank(filter.category.as_ref());
    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM announcements WHERE {FILTER}"))
        .bind(&category)
        .bind(&search)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&state.pool)
        .await?;

    let items = sqlx::query_as::<_, AnnouncementResponse>(&format!(
        "SELECT {COLUMNS} FROM announcements WHERE {FILTER}
         ORDER BY created_at DESC LIMIT $5 OFFSET $6"
    ))
    .bind(&category)
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
async fn get_announcement(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> Result<Json<AnnouncementResponse>, ApiError> {
    let id = Uuid::parse_str(&key).ok();
    let row = sqlx::query_as::<_, AnnouncementResponse>(&format!(
        "SELECT {COLUMNS} FROM announcements WHERE id = $1 OR slug = $2
         ORDER BY id IS NOT DISTINCT FROM $1 DESC LIMIT 1"
    ))
    .bind(id)
    .bind(&key)
    .fetch_optional(&state.pool)
    .await?;

    row.map(Json)
        .ok_or_else(|| ApiError::NotFound("announcement".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_announcement(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("announcement".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "announcement.delete", "announcement").resource_id(id),
    )
    .await;

    Ok(deleted())
}
