use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ApiError;
use crate::notify::sms::ArkeselClient;

/// Scheduled rows sent in parallel per sweep.
const SEND_CONCURRENCY: usize = 4;

/// A `sending` row older than this has lost its sender.
const CLAIM_LEASE: &str = "10 minutes";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BroadcastMessage {
    pub id: Uuid,
    pub message: String,
    pub recipients: Vec<String>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub const COLUMNS: &str =
    "id, message, recipients, status, scheduled_at, sent_at, error, created_by, created_at";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Send `message` now and record the outcome on row `id`.
/// Returns the updated row.
#[tracing::instrument(skip(pool, sms, recipients, message), fields(%id), err)]
pub async fn deliver(
    pool: &PgPool,
    sms: &ArkeselClient,
    id: Uuid,
    recipients: &[String],
    message: &str,
) -> Result<BroadcastMessage, ApiError> {
    let outcome = sms.send(recipients, message).await;

    let row = match outcome {
        Ok(()) => {
            sqlx::query_as::<_, BroadcastMessage>(&format!(
                "UPDATE broadcast_messages SET status = 'sent', sent_at = now(), error = NULL
                 WHERE id = $1 RETURNING {COLUMNS}"
            ))
            .bind(id)
            .fetch_one(pool)
            .await?
        }
        Err(e) => {
            tracing::warn!(%id, error = %e, "broadcast send failed");
            sqlx::query_as::<_, BroadcastMessage>(&format!(
                "UPDATE broadcast_messages SET status = 'failed', error = $2
                 WHERE id = $1 RETURNING {COLUMNS}"
            ))
            .bind(id)
            .bind(e.to_string())
            .fetch_one(pool)
            .await?
        }
    };

    Ok(row)
}

#[derive(sqlx::FromRow)]
struct ClaimedBroadcast {
    id: Uuid,
    message: String,
    recipients: Vec<String>,
}

/// Flip every due `pending` row to `sending`. Rows locked by a concurrent
/// sweep are skipped, so each row is claimed exactly once.
async fn claim_due(pool: &PgPool) -> Result<Vec<ClaimedBroadcast>, sqlx::Error> {
    sqlx::query_as::<_, ClaimedBroadcast>(
        r"
        UPDATE broadcast_messages SET status = 'sending', claimed_at = now()
        WHERE id IN (
            SELECT id FROM broadcast_messages
            WHERE status = 'pending' AND scheduled_at <= now()
            ORDER BY scheduled_at
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, message, recipients
        ",
    )
    .fetch_all(pool)
    .await
}

/// Fail `sending` rows whose claim outlived [`CLAIM_LEASE`]. They are not re-sent.
async fn expire_stale_claims(pool: &PgPool) -> Result<usize, sqlx::Error> {
    let expired: Vec<Uuid> = sqlx::query_scalar(&format!(
        "UPDATE broadcast_messages
         SET status = 'failed', error = 'delivery outcome unknown: sender stopped before recording it'
         WHERE status = 'sending' AND claimed_at < now() - interval '{CLAIM_LEASE}'
         RETURNING id"
    ))
    .fetch_all(pool)
    .await?;
    for id in &expired {
        tracing::warn!(%id, "expired stale broadcast claim");
    }
    Ok(expired.len())
}

async fn mark_failed(pool: &PgPool, id: Uuid, reason: &str) {
    let result = sqlx::query(
        "UPDATE broadcast_messages SET status = 'failed', error = $2
         WHERE id = $1 AND status = 'sending'",
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::error!(%id, error = %e, "failed to mark broadcast failed");
    }
}

/// Send every scheduled broadcast that has come due. A failing row is
/// marked `failed` without affecting the rest of the batch.
#[tracing::instrument(skip_all, err)]
pub async fn send_due_broadcasts(pool: &PgPool, sms: &ArkeselClient) -> Result<SweepReport, ApiError> {
    let expired = expire_stale_claims(pool).await?;
    let claimed = claim_due(pool).await?;
    if claimed.is_empty() && expired == 0 {
        return Ok(SweepReport::default());
    }

    let outcomes: Vec<bool> = futures_util::stream::iter(claimed)
        .map(|row| async move {
            match deliver(pool, sms, row.id, &row.recipients, &row.message).await {
                Ok(updated) => updated.status == "sent",
                Err(e) => {
                    tracing::error!(id = %row.id, error = %e, "failed to record broadcast outcome");
                    mark_failed(pool, row.id, &format!("could not record delivery outcome: {e}"))
                        .await;
                    false
                }
            }
        })
        .buffer_unordered(SEND_CONCURRENCY)
        .collect()
        .await;

    let sent = outcomes.iter().filter(|ok| **ok).count();
    let processed = outcomes.len() + expired;
    let report = SweepReport {
        processed,
        sent,
        failed: processed - sent,
    };
    tracing::info!(
        processed = report.processed,
        sent = report.sent,
        failed = report.failed,
        "scheduled broadcasts processed"
    );
    Ok(report)
}

/// Periodic sweep until `shutdown` fires.
pub async fn run(
    pool: PgPool,
    sms: std::sync::Arc<ArkeselClient>,
    every: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(interval_secs = every.as_secs(), "broadcast worker started");
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = send_due_broadcasts(&pool, &sms).await {
                    tracing::error!(error = %e, "broadcast sweep failed");
                }
            }
        }
    }

    tracing::info!("broadcast worker stopped");
}
