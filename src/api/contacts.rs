use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{
    ApiJson, ApiPath, ApiQuery, ListResponse, Pagination, deleted, like_pattern, non_blank,
};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::{AuthUser, ClientIp};
use crate::auth::rate_limit;
use crate::auth::roles::{self, ADMIN_ONLY};
use crate::error::ApiError;
use crate::store::AppState;
use crate::validation;

#[derive(Debug, Deserialize)]
pub struct CreateContactRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactFilter {
    pub search: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ContactResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, name, email, phone, subject, message, created_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/contacts/create", post(create_contact))
        .route("/api/contacts/get", get(list_contacts))
        .route("/api/contacts/get/{id}", get(get_contact))
        .route("/api/contacts/delete/{id}", delete(delete_contact))
}

#[tracing::instrument(skip(state, ip, body), err)]
async fn create_contact(
    State(state): State<AppState>,
    ip: ClientIp,
    ApiJson(body): ApiJson<CreateContactRequest>,
) -> Result<impl IntoResponse, ApiError> {
    rate_limit::check_rate(&state.valkey, "contact", ip.key(), 10, 3600).await?;

    validation::check_required("name", &body.name, 255)?;
    validation::check_email(&body.email)?;
    validation::check_required("message", &body.message, 5000)?;
    validation::check_optional("subject", body.subject.as_deref(), 200)?;
    if let Some(ref phone) = body.phone {
        validation::check_phone(phone)?;
    }

    let contact = sqlx::query_as::<_, ContactResponse>(&format!(
        "INSERT INTO contact_messages (name, email, phone, subject, message)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {COLUMNS}"
    ))
    .bind(body.name.trim())
    .bind(body.email.trim())
    .bind(&body.phone)
    .bind(non_blank(body.subject.as_ref()))
    .bind(&body.message)
    .fetch_one(&state.pool)
    .await?;

    write_audit(
        &state.pool,
        AuditEntry {
            actor_id: None,
            actor_name: contact.name.as_str(),
            action: "contact.create",
            resource: "contact_message",
            resource_id: Some(contact.id),
            detail: None,
            ip_addr: ip.0.as_deref(),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(contact)))
}

async fn list_contacts(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<ContactFilter>,
) -> Result<Json<ListResponse<ContactResponse>>, ApiError> {
    roles::require_any_role(&auth, ADMIN_ONLY)?;

    let search = non_blank(filter.search.as_ref()).map(|s| like_pattern(&s));
    let clause = "($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1 OR subject ILIKE $1)";

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM contact_messages WHERE {clause}"))
            .bind(&search)
            .fetch_one(&state.pool)
            .await?;

    let items = sqlx::query_as::<_, ContactResponse>(&format!(
        "SELECT {COLUMNS} FROM contact_messages WHERE {clause}
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

async fn get_contact(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ContactResponse>, ApiError> {
    roles::require_any_role(&auth, ADMIN_ONLY)?;

    sqlx::query_as::<_, ContactResponse>(&format!(
        "SELECT {COLUMNS} FROM contact_messages WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound("contact message".into()))
}

#[tracing::instrument(skip(state), fields(%id), err)]
async fn delete_contact(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    roles::require_any_role(&auth, ADMIN_ONLY)?;

    let result = sqlx::query("DELETE FROM contact_messages WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("contact message".into()));
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "contact.delete", "contact_message").resource_id(id),
    )
    .await;

    Ok(deleted())
}
