use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::helpers::{ApiJson, ApiPath, ApiQuery, ListResponse, Pagination};
use crate::audit::{AuditEntry, write_audit};
use crate::auth::middleware::AuthUser;
use crate::auth::roles::Role;
use crate::error::ApiError;
use crate::payments::momo::RequestToPay;
use crate::payments::{PaymentStatus, Purpose};
use crate::store::AppState;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub amount: f64,
    pub phone: String,
    #[serde(default)]
    pub purpose: Purpose,
    pub payer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub reference_id: Uuid,
    pub user_id: Option<Uuid>,
    pub phone: String,
    pub amount: f64,
    pub currency: String,
    pub purpose: String,
    pub payer_message: Option<String>,
    pub status: String,
    pub financial_transaction_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, reference_id, user_id, phone, amount, currency, purpose, payer_message, \
                       status, financial_transaction_id, reason, created_at, updated_at";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/momo/initiate", post(initiate_payment))
        .route("/api/payments/momo/status/{reference_id}", get(payment_status))
        .route("/api/payments/get", get(list_payments))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, body), fields(user_id = %auth.user_id), err)]
async fn initiate_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiJson(body): ApiJson<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::check_positive_amount("amount", body.amount)?;
    let phone = body.phone.trim();
    validation::check_phone(phone)?;
    validation::check_optional("payer_message", body.payer_message.as_deref(), 160)?;

    let reference_id = Uuid::new_v4();
    let payer_message = body
        .payer_message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map_or_else(|| format!("Church {}", body.purpose.as_str()), ToOwned::to_owned);

    let payment = sqlx::query_as::<_, PaymentResponse>(&format!(
        "INSERT INTO payments (reference_id, user_id, phone, amount, currency, purpose, payer_message)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {COLUMNS}"
    ))
    .bind(reference_id)
    .bind(auth.user_id)
    .bind(phone)
    .bind(body.amount)
    .bind(state.momo.currency())
    .bind(body.purpose.as_str())
    .bind(&payer_message)
    .fetch_one(&state.pool)
    .await?;

    let external_id = payment.id.to_string();
    let request = RequestToPay {
        reference_id,
        amount: body.amount,
        phone,
        external_id: &external_id,
        payer_message: &payer_message,
        payee_note: body.purpose.as_str(),
    };

    if let Err(e) = state.momo.request_to_pay(&state.valkey, &request).await {
        sqlx::query("UPDATE payments SET status = 'failed', reason = $2 WHERE id = $1")
            .bind(payment.id)
            .bind(e.to_string())
            .execute(&state.pool)
            .await?;
        return Err(e.into());
    }

    write_audit(
        &state.pool,
        AuditEntry::by(&auth, "payment.initiate", "payment")
            .resource_id(payment.id)
            .detail(serde_json::json!({
                "reference_id": reference_id,
                "amount": payment.amount,
                "purpose": payment.purpose,
            })),
    )
    .await;

    Ok((StatusCode::ACCEPTED, Json(payment)))
}

/// Refresh a pending payment from MoMo. Final payments are served from the
/// database.
#[tracing::instrument(skip(state), fields(%reference_id), err)]
async fn payment_status(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(reference_id): ApiPath<Uuid>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = sqlx::query_as::<_, PaymentResponse>(&format!(
        "SELECT {COLUMNS} FROM payments WHERE reference_id = $1"
    ))
    .bind(reference_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("payment".into()))?;

    if payment.user_id != Some(auth.user_id) && !auth.roles.has(Role::Admin) {
        return Err(ApiError::Forbidden);
    }

    let current: PaymentStatus = payment
        .status
        .parse()
        .map_err(|e: String| ApiError::Internal(anyhow::anyhow!(e)))?;
    if current.is_final() {
        return Ok(Json(payment));
    }

    let upstream = state.momo.request_status(&state.valkey, reference_id).await?;
    let status = PaymentStatus::from_upstream(&upstream.status);

    let updated = sqlx::query_as::<_, PaymentResponse>(&format!(
        "UPDATE payments SET status = $2,
                financial_transaction_id = COALESCE($3, financial_transaction_id),
                reason = COALESCE($4, reason)
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(payment.id)
    .bind(status.as_str())
    .bind(&upstream.financial_transaction_id)
    .bind(upstream.reason())
    .fetch_one(&state.pool)
    .await?;

    if status != current {
        tracing::info!(%reference_id, status = %status, "payment status changed");
    }

    Ok(Json(updated))
}

/// Admins see every payment; everyone else sees their own.
async fn list_payments(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(page): ApiQuery<Pagination>,
    ApiQuery(filter): ApiQuery<PaymentFilter>,
) -> Result<Json<ListResponse<PaymentResponse>>, ApiError> {
    let owner = if auth.roles.has(Role::Admin) {
        None
    } else {
        Some(auth.user_id)
    };
    let status = filter.status.map(PaymentStatus::as_str);
    let clause = "($1::uuid IS NULL OR user_id = $1) AND ($2::text IS NULL OR status = $2)";

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM payments WHERE {clause}"))
        .bind(owner)
        .bind(status)
        .fetch_one(&state.pool)
        .await?;

    let items = sqlx::query_as::<_, PaymentResponse>(&format!(
        "SELECT {COLUMNS} FROM payments WHERE {clause}
         ORDER BY created_at DESC LIMIT $3 OFFSET $4"
    ))
    .bind(owner)
    .bind(status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ListResponse { items, total }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_defaults_when_omitted() {
        let req: InitiatePaymentRequest = serde_json::from_value(serde_json::json!({
            "amount": 20,
            "phone": "233244000001",
        }))
        .unwrap();
        assert_eq!(req.purpose, Purpose::Offering);
        assert!(req.payer_message.is_none());
    }

    #[test]
    fn unknown_purpose_rejected() {
        let result = serde_json::from_value::<InitiatePaymentRequest>(serde_json::json!({
            "amount": 20,
            "phone": "233244000001",
            "purpose": "building_fund",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn status_filter_parses_lowercase() {
        let f: PaymentFilter =
            serde_json::from_value(serde_json::json!({ "status": "successful" })).unwrap();
        assert_eq!(f.status, Some(PaymentStatus::Successful));
    }
}
