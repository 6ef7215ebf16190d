use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;

pub struct AuditEntry<'a> {
    pub actor_id: Option<Uuid>,
    pub actor_name: &'a str,
    pub action: &'a str,
    pub resource: &'a str,
    pub resource_id: Option<Uuid>,
    pub detail: Option<serde_json::Value>,
    pub ip_addr: Option<&'a str>,
}

impl<'a> AuditEntry<'a> {
    /// Entry attributed to an authenticated user.
    pub fn by(auth: &'a AuthUser, action: &'a str, resource: &'a str) -> Self {
        Self {
            actor_id: Some(auth.user_id),
            actor_name: &auth.user_name,
            action,
            resource,
            resource_id: None,
            detail: None,
            ip_addr: auth.ip_addr.as_deref(),
        }
    }

    pub fn resource_id(mut self, id: Uuid) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Record an audit entry. Failures are logged and never fail the request.
pub async fn write_audit(pool: &PgPool, entry: AuditEntry<'_>) {
    if let Err(e) = write_audit_inner(pool, &entry).await {
        tracing::warn!(
            error = %e,
            action = entry.action,
            resource = entry.resource,
            "failed to write audit log entry"
        );
    }
}

async fn write_audit_inner(pool: &PgPool, entry: &AuditEntry<'_>) -> Result<(), sqlx::Error> {
    let ip: Option<ipnetwork::IpNetwork> = entry.ip_addr.and_then(|s| s.parse().ok());

    sqlx::query(
        r"
        INSERT INTO audit_log (actor_id, actor_name, action, resource, resource_id, detail, ip_addr)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(entry.actor_id)
    .bind(entry.actor_name)
    .bind(entry.action)
    .bind(entry.resource)
    .bind(entry.resource_id)
    .bind(&entry.detail)
    .bind(ip)
    .execute(pool)
    .await?;

    Ok(())
}
