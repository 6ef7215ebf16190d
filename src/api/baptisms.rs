use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{
    ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, deleted, like_pattern, non_blank,
};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::AuthUser;
use crate::auth::roles::{self, PASTORAL};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBaptismRequest {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub previous_church: Option<String>,
    pub testimony: Option<String>,
    pub preferred_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct BaptismFilter {
    pub search: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BaptismResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub previous_church: Option<String>,
    pub testimony: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, user_id, full_name, email, phone, date_of_birth, address, \
                       previous_church, testimony, preferred_date, created_at";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/baptisms/create", post(create_application))
        .route("/api/baptisms/get", get(list_applications))
        .route("/api/baptisms/get/{id}", get(get_application))
        .route("/api/baptisms/delete/{id}", delete(delete_application))
}

fn validate(body: &CreateBaptismRequest) -> Result<(), ApiError> {
    validation::check_required("full_name", &body.full_name, 255)?;
    validation::check_phone(&body.phone)?;
    if let Some(ref email) = body.email {
        validation::check_email(email)?;
    }
    validation::check_optional("address", body.address.as_deref(), 500)?;
    validation::check_optional("previous_church", body.previous_church.as_deref(), 255)?;
    validation::check_optional("testimony", body.testimony.as_deref(), 10_000)?;

    if let Some(dob) = body.date_of_birth
        && dob > Utc::now().date_naive()
    {
        return Err(ApiError::BadRequest(
            "date_of_birth cannot be in the future".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %auth.user_id), err)]
async fn create_application(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateBaptismRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&body)?;

    let application = sqlx::query_as::<_, BaptismResponse>(&format!(
        "INSERT INTO baptism_applications
            (user_id, full_name, email, phone, date_of_birth, address,
             previous_church, testimony, preferred_date)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING {COLUMNS}"
    ))
    .bind(auth.user_id)
    .bind(body.full_name.trim())
    .bind(&body.email)
    .bind(&body.phone)
    .bind(body.date_of_birth)
    .bind(&body.address)
    .bind(&body.previous_church)
    .bind(&body.testimony)
    .bind(body.preferred_date)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "baptism.create", "baptism_application")
            .resource_id(application.id),
    )
    .await;

    Ok((StatusCode::CREATED, Json(application)))
}

async fn list_applications(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<BaptismFilter>,
) -> Result<Json<ListResponse<BaptismResponse>>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));
    let clause = "($1::text IS NULL OR full_name ILIKE $1 OR phone ILIKE $1)";

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM baptism_applications WHERE {clause}"
    ))
    .bind(&search)
    .fetch_one(&state.pool)
    .await?;

    let items = sqlx::query_as::<_, BaptismResponse>(&format!(
        "SELECT {COLUMNS} FROM baptism_applications WHERE {clause}
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

/// Pastoral staff see every application; applicants see their own.
async fn get_application(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<BaptismResponse>, ApiError> {
    let application = sqlx::query_as::<_, BaptismResponse>(&format!(
        "SELECT {COLUMNS} FROM baptism_applications WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("baptism application".into()))?;

    if application.user_id != Some(auth.user_id) {
        roles::require_any_role(&auth, PASTORAL)?;
    }

    Ok(Json(application))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_application(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    let result = sqlx::query("DELETE FROM baptism_applications WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("baptism application".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "baptism.delete", "baptism_application").resource_id(id),
    )
    .await;

    Ok(deleted())
}
