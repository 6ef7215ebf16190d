use axum::extract::{FromRequest, FromRequestParts};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::ApiError;
use crate::validation;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `Json` body whose rejection renders as an [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

pub fn deleted() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "ok": true }))
}

/// Tables whose rows carry a unique `slug` column.
#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Announcements,
    Events,
}

impl SlugTable {
    fn name(self) -> &'static str {
        match self {
            Self::Announcements => "announcements",
            Self::Events => "events",
        }
    }
}

/// Derive a slug from `title` that is not yet used in `table`.
pub async fn unique_slug(pool: &PgPool, table: SlugTable, title: &str) -> Result<String, ApiError> {
    let base = validation::slugify(title);
    let sql = format!(
        "SELECT slug FROM {} WHERE slug = $1 OR slug LIKE $1 || '-%'",
        table.name()
    );
    let taken: Vec<String> = sqlx::query_scalar(&sql).bind(&base).fetch_all(pool).await?;
    Ok(validation::next_free_slug(&base, &taken))
}

/// A concurrent insert took the slug between [`unique_slug`] and the INSERT.
pub fn is_slug_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint().is_some_and(|c| c.ends_with("_slug_key"))
        }
        _ => false,
    }
}

/// `%term%` for ILIKE, with LIKE metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Blank query strings (`?search=`) count as absent.
pub fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}
