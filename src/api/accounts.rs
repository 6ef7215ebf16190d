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
use crate::auth::roles::{self, ADMIN_ONLY, PASTORAL};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub member_name: String,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub tithe: f64,
    #[serde(default)]
    pub offering: f64,
    #[serde(default)]
    pub donation: f64,
    pub recorded_on: Option<NaiveDate>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountFilter {
    pub user_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AccountResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub member_name: String,
    pub tithe: f64,
    pub offering: f64,
    pub donation: f64,
    pub recorded_on: NaiveDate,
    pub note: Option<String>,
    pub recorded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AccountSummary {
    pub tithe: f64,
    pub offering: f64,
    pub donation: f64,
    pub total: f64,
    pub count: i64,
}

const COLUMNS: &str = "id, user_id, member_name, tithe, offering, donation, recorded_on, note, \
                       recorded_by, created_at";

const FILTER: &str = r"
    ($1::uuid IS NULL OR user_id = $1)
    AND ($2::date IS NULL OR recorded_on >= $2)
    AND ($3::date IS NULL OR recorded_on <= $3)
    AND ($4::text IS NULL OR member_name ILIKE $4)
";

fn validate(body: &CreateAccountRequest) -> Result<(), ApiError> {
    validation::check_required("member_name", &body.member_name, 255)?;
    validation::check_amount("tithe", body.tithe)?;
    validation::check_amount("offering", body.offering)?;
    validation::check_amount("donation", body.donation)?;
    if body.tithe + body.offering + body.donation <= 0.0 {
        return Err(ApiError::BadRequest(
            "at least one of tithe, offering or donation must be positive".into(),
        ));
    }
    validation::check_optional("note", body.note.as_deref(), 1000)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/accounts/create", post(create_account))
        .route("/api/accounts/get", get(list_accounts))
        .route("/api/accounts/get/{id}", get(get_account))
        .route("/api/accounts/summary", get(summary))
        .route("/api/accounts/delete/{id}", delete(delete_account))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(member = %body.member_name), err)]
async fn create_account(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    roles::require_any_role(&auth, ADMIN_ONLY)?;
    validate(&body)?;

    if let Some(user_id) = body.user_id {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;
        if !exists {
            return Err(ApiError::BadRequest("user_id does not match a user".into()));
        }
    }

    let recorded_on = body.recorded_on.unwrap_or_else(|| Utc::now().date_naive());

    let account = sqlx::query_as::<_, AccountResponse>(&format!(
        "INSERT INTO church_accounts
            (user_id, member_name, tithe, offering, donation, recorded_on, note, recorded_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {COLUMNS}"
    ))
    .bind(body.user_id)
    .bind(body.member_name.trim())
    .bind(body.tithe)
    .bind(body.offering)
    .bind(body.donation)
    .bind(recorded_on)
    .bind(non_blank(body.note.as_ref()))
    .bind(auth.user_id)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "account.create", "church_account")
            .resource_id(account.id)
            .detail(serde_json::json!({
                "tithe": account.tithe,
                "offering": account.offering,
                "donation": account.donation,
            })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<AccountFilter>,
) -> Result<Json<ListResponse<AccountResponse>>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;
    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM church_accounts WHERE {FILTER}"))
            .bind(filter.user_id)
            .bind(filter.from)
            .bind(filter.to)
            .bind(&search)
            .fetch_one(&state.pool)
            .await?;

    let items = sqlx::query_as::<_, AccountResponse>(&format!(
        "SELECT {COLUMNS} FROM church_accounts WHERE {FILTER}
         ORDER BY recorded_on DESC, created_at DESC LIMIT $5 OFFSET $6"
    ))
    .bind(filter.user_id)
    .bind(filter.from)
    .bind(filter.to)
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

/// Totals over the same filters as the list endpoint.
async fn summary(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(filter): ApiQuery<AccountFilter>,
) -> Result<Json<AccountSummary>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;
    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));

    let summary = sqlx::query_as::<_, AccountSummary>(&format!(
        "SELECT COALESCE(SUM(tithe), 0)::float8 AS tithe,
                COALESCE(SUM(offering), 0)::float8 AS offering,
                COALESCE(SUM(donation), 0)::float8 AS donation,
                COALESCE(SUM(tithe + offering + donation), 0)::float8 AS total,
                COUNT(*) AS count
         FROM church_accounts WHERE {FILTER}"
    ))
    .bind(filter.user_id)
    .bind(filter.from)
    .bind(filter.to)
    .bind(&search)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(summary))
}

async fn get_account(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<AccountResponse>, ApiError> {
    roles::require_any_role(&auth, PASTORAL)?;

    sqlx::query_as::<_, AccountResponse>(&format!(
        "SELECT {COLUMNS} FROM church_accounts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("account record".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_account(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, ADMIN_ONLY)?;

    let result = sqlx::query("DELETE FROM church_accounts WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("account record".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "account.delete", "church_account").resource_id(id),
    )
    .await;

    Ok(deleted())
}
