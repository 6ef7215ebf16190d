#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use church_platform::auth::roles::Role;
use church_platform::config::{Config, MomoConfig, SmsConfig};
use church_platform::notify::sms::ArkeselClient;
use church_platform::payments::momo::MomoClient;
use church_platform::store::AppState;

pub const ADMIN_EMAIL: &str = "admin@localhost";
pub const ADMIN_PASSWORD: &str = "testpassword";
pub const USER_PASSWORD: &str = "testpass123";

/// Upstream base URLs that refuse connections.
const UNREACHABLE: &str = "http://127.0.0.1:1";

/// Build a test `AppState` whose SMS and MoMo clients point nowhere.
pub async fn test_state(pool: PgPool) -> AppState {
    test_state_with(pool, UNREACHABLE, UNREACHABLE).await
}

/// Build a test `AppState` with the given upstream base URLs (usually
/// `wiremock` servers).
///
/// - Bootstraps the admin user (password = "testpassword")
/// - Connects to real Valkey and flushes it
pub async fn test_state_with(pool: PgPool, sms_url: &str, momo_url: &str) -> AppState {
    church_platform::store::bootstrap::run(&pool, ADMIN_EMAIL, Some(ADMIN_PASSWORD))
        .await
        .expect("bootstrap failed");

    let valkey_url =
        std::env::var("VALKEY_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let valkey = church_platform::store::valkey::connect(&valkey_url)
        .await
        .expect("valkey connection failed");
    {
        use fred::interfaces::ClientLike;
        let _: fred::types::Value = valkey
            .custom(
                fred::types::CustomCommand::new_static("FLUSHDB", None, false),
                Vec::<fred::types::Value>::new(),
            )
            .await
            .expect("FLUSHDB failed");
    }

    let config = Config {
        listen: "127.0.0.1:0".into(),
        database_url: "postgres://localhost/test".into(),
        valkey_url,
        admin_email: ADMIN_EMAIL.into(),
        admin_password: None,
        secure_cookies: false,
        cors_origins: vec![],
        trust_proxy_headers: true,
        broadcast_interval_secs: 0,
        sms: SmsConfig {
            base_url: sms_url.into(),
            api_key: "test-sms-key".into(),
            sender_id: "Church".into(),
        },
        momo: MomoConfig {
            base_url: momo_url.into(),
            subscription_key: "test-subscription".into(),
            api_user: "test-user".into(),
            api_key: "test-key".into(),
            target_environment: "sandbox".into(),
            currency: "EUR".into(),
            callback_url: None,
        },
    };

    let sms = ArkeselClient::new(&config.sms).expect("sms client");
    let momo = MomoClient::new(&config.momo).expect("momo client");

    AppState {
        pool,
        valkey,
        config: Arc::new(config),
        sms: Arc::new(sms),
        momo: Arc::new(momo),
    }
}

/// Build the full API router with the given state.
pub fn test_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(church_platform::api::router())
        .with_state(state)
}

/// Login with email and password. Returns the bearer token.
pub async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = post_json(
        app,
        "",
        "/api/auth/login",
        serde_json::json!({ "email": email, "password": password }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed for {email}: {body}");
    body["token"]
        .as_str()
        .expect("login response missing token")
        .to_owned()
}

/// Login as the bootstrap admin user.
pub async fn admin_login(app: &Router) -> String {
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

/// Insert an active member with the given extra roles and log them in.
/// Returns `(user_id, token)`.
pub async fn create_user(
    app: &Router,
    pool: &PgPool,
    name: &str,
    email: &str,
    roles: &[Role],
) -> (Uuid, String) {
    let hash = church_platform::auth::password::hash_password(USER_PASSWORD).unwrap();
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (name, email, phone, password_hash, is_admin, is_pastor, is_dept_head)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(name)
    .bind(email)
    .bind(format!("23324{:07}", rand_digits()))
    .bind(&hash)
    .bind(roles.contains(&Role::Admin))
    .bind(roles.contains(&Role::Pastor))
    .bind(roles.contains(&Role::DeptHead))
    .fetch_one(pool)
    .await
    .expect("insert user failed");

    let token = login(app, email, USER_PASSWORD).await;
    (user_id, token)
}

fn rand_digits() -> u32 {
    Uuid::new_v4().as_u128() as u32 % 10_000_000
}

/// Send a GET request with Bearer auth.
pub async fn get_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with Bearer auth and JSON body.
pub async fn post_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send_json(app, "POST", token, path, body).await
}

/// Send a PATCH request with Bearer auth and JSON body.
pub async fn patch_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    send_json(app, "PATCH", token, path, body).await
}

async fn send_json(
    app: &Router,
    method: &str,
    token: &str,
    path: &str,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("Content-Type", "application/json");
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// POST without auth from a given client address (via `X-Forwarded-For`).
pub async fn post_from(app: &Router, ip: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json")
        .header("X-Forwarded-For", ip)
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a DELETE request with Bearer auth.
pub async fn delete_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("DELETE").uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Extract JSON body from a response.
pub async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
