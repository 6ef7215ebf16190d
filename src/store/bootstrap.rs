use sqlx::PgPool;

use crate::auth::password;

/// Create the first administrator when the users table is empty.
#[tracing::instrument(skip(pool, admin_password), err)]
pub async fn run(pool: &PgPool, admin_email: &str, admin_password: Option<&str>) -> anyhow::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    if count > 0 {
        tracing::info!("bootstrap skipped: users already exist");
        return Ok(());
    }

    tracing::info!("first run detected, creating administrator");

    let password_hash = password::hash_password(admin_password.unwrap_or("admin"))?;

    let admin_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO users (name, email, password_hash, is_admin, is_pastor, is_member)
         VALUES ('Administrator', $1, $2, true, true, true)
         RETURNING id",
    )
    .bind(admin_email)
    .bind(&password_hash)
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = %admin_id, "admin user created");

    Ok(())
}
