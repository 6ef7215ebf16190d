mod helpers;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use church_platform::auth::roles::Role;

// ---------------------------------------------------------------------------
// Announcements
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn announcement_create_and_fetch_by_slug(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({
            "title": "Harvest Thanksgiving!",
            "body": "Join us on Sunday.",
            "category": "service",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["slug"], "harvest-thanksgiving");
    let id = body["id"].as_str().unwrap().to_owned();

    // Reads are public
    let (status, by_slug) =
        helpers::get_json(&app, "", "/api/announcements/get/harvest-thanksgiving").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_slug["id"], id.as_str());

    let (status, by_id) = helpers::get_json(&app, "", &format!("/api/announcements/get/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["title"], "Harvest Thanksgiving!");

    let (status, _) = helpers::get_json(&app, "", "/api/announcements/get/no-such-slug").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn announcement_slugs_stay_unique(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let mut slugs = Vec::new();
    for _ in 0..3 {
        let (status, body) = helpers::post_json(
            &app,
            &admin,
            "/api/announcements/create",
            serde_json::json!({ "title": "Youth Camp", "body": "Details soon" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        slugs.push(body["slug"].as_str().unwrap().to_owned());
    }
    assert_eq!(slugs, vec!["youth-camp", "youth-camp-2", "youth-camp-3"]);
}

#[sqlx::test(migrations = "./migrations")]
async fn announcement_list_filters(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    for (title, category) in [
        ("Choir rehearsal", "music"),
        ("Band auditions", "music"),
        ("Men's breakfast", "fellowship"),
    ] {
        let (status, _) = helpers::post_json(
            &app,
            &admin,
            "/api/announcements/create",
            serde_json::json!({ "title": title, "body": "All welcome", "category": category }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = helpers::get_json(&app, "", "/api/announcements/get").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"][0]["title"], "Men's breakfast", "newest first");

    let (_, body) = helpers::get_json(&app, "", "/api/announcements/get?category=music").await;
    assert_eq!(body["total"], 2);

    let (_, body) = helpers::get_json(&app, "", "/api/announcements/get?search=CHOIR").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["title"], "Choir rehearsal");

    let (_, body) = helpers::get_json(&app, "", "/api/announcements/get?limit=2&offset=2").await;
    assert_eq!(body["total"], 3);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    // A LIKE wildcard in the search term is matched literally
    let (_, body) = helpers::get_json(&app, "", "/api/announcements/get?search=%25").await;
    assert_eq!(body["total"], 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn announcement_roles(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;
    let (_, member) = helpers::create_user(&app, &pool, "M", "m@example.org", &[]).await;
    let (_, head) =
        helpers::create_user(&app, &pool, "H", "h@example.org", &[Role::DeptHead]).await;

    let payload = serde_json::json!({ "title": "Ushers meeting", "body": "After service" });

    let (status, _) =
        helpers::post_json(&app, &member, "/api/announcements/create", payload.clone()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = helpers::post_json(&app, "", "/api/announcements/create", payload.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) =
        helpers::post_json(&app, &head, "/api/announcements/create", payload).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_owned();

    // Department heads publish but cannot delete
    let (status, _) =
        helpers::delete_json(&app, &head, &format!("/api/announcements/delete/{id}")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) =
        helpers::delete_json(&app, &admin, &format!("/api/announcements/delete/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) =
        helpers::delete_json(&app, &admin, &format!("/api/announcements/delete/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "./migrations")]
async fn announcement_requires_title_and_body(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({ "title": "", "body": "text" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"));

    let (status, _) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({ "title": "Hi", "body": "text", "image_url": "ftp://x/y.png" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_fields_answer_json_400(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({ "body": "text" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("title"), "got {body}");

    // Wrong type for a field
    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({ "title": 7, "body": "text" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Malformed path and query parameters
    let (status, body) =
        helpers::delete_json(&app, &admin, "/api/announcements/delete/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = helpers::get_json(&app, "", "/api/announcements/get?limit=many").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[sqlx::test(migrations = "./migrations")]
async fn uuid_shaped_title_resolves_by_slug(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;
    let title = "123e4567-e89b-12d3-a456-426614174000";

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/announcements/create",
        serde_json::json!({ "title": title, "body": "text" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["slug"], title);
    let id = body["id"].as_str().unwrap().to_owned();

    let (status, found) = helpers::get_json(&app, "", &format!("/api/announcements/get/{title}")).await;
    assert_eq!(status, StatusCode::OK, "got {found}");
    assert_eq!(found["id"], id.as_str());

    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/events/create",
        serde_json::json!({ "title": title, "starts_at": Utc::now() + Duration::days(1) }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let event_id = body["id"].as_str().unwrap().to_owned();

    let (status, found) = helpers::get_json(&app, "", &format!("/api/events/get/{title}")).await;
    assert_eq!(status, StatusCode::OK, "got {found}");
    assert_eq!(found["id"], event_id.as_str());

    // An id still wins over a slug that happens to equal it
    let (status, found) = helpers::get_json(&app, "", &format!("/api/events/get/{event_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], event_id.as_str());
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_same_title_creates_both_succeed(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let payload = serde_json::json!({ "title": "Watchnight Service", "body": "31 December" });
    let (first, second) = tokio::join!(
        helpers::post_json(&app, &admin, "/api/announcements/create", payload.clone()),
        helpers::post_json(&app, &admin, "/api/announcements/create", payload.clone()),
    );
    assert_eq!(first.0, StatusCode::CREATED, "got {}", first.1);
    assert_eq!(second.0, StatusCode::CREATED, "got {}", second.1);

    let mut slugs = vec![
        first.1["slug"].as_str().unwrap().to_owned(),
        second.1["slug"].as_str().unwrap().to_owned(),
    ];
    slugs.sort();
    assert_eq!(slugs, vec!["watchnight-service", "watchnight-service-2"]);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

async fn create_event(app: &axum::Router, token: &str, title: &str, days_from_now: i64) -> String {
    let starts_at = Utc::now() + Duration::days(days_from_now);
    let (status, body) = helpers::post_json(
        app,
        token,
        "/api/events/create",
        serde_json::json!({
            "title": title,
            "starts_at": starts_at,
            "location": "Main Auditorium",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create event failed: {body}");
    body["id"].as_str().unwrap().to_owned()
}

#[sqlx::test(migrations = "./migrations")]
async fn events_upcoming_and_past(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    create_event(&app, &admin, "Last year's retreat", -300).await;
    create_event(&app, &admin, "Last week's picnic", -7).await;
    create_event(&app, &admin, "Next month's crusade", 30).await;
    create_event(&app, &admin, "Tomorrow's prayer", 1).await;

    let (status, body) = helpers::get_json(&app, "", "/api/events/get?upcoming=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"][0]["title"], "Tomorrow's prayer", "soonest first");

    let (_, body) = helpers::get_json(&app, "", "/api/events/get?upcoming=false").await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"][0]["title"], "Last week's picnic", "most recent first");

    let (_, body) = helpers::get_json(&app, "", "/api/events/get").await;
    assert_eq!(body["total"], 4);
    assert_eq!(body["items"][0]["title"], "Last year's retreat");

    let (_, body) = helpers::get_json(&app, "", "/api/events/get?search=auditorium").await;
    assert_eq!(body["total"], 4, "search covers location");
}

#[sqlx::test(migrations = "./migrations")]
async fn event_end_before_start_rejected(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;

    let starts_at = Utc::now() + Duration::days(2);
    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/events/create",
        serde_json::json!({
            "title": "Vigil",
            "starts_at": starts_at,
            "ends_at": starts_at - Duration::hours(3),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ends_at"));

    // starts_at is required
    let (status, body) = helpers::post_json(
        &app,
        &admin,
        "/api/events/create",
        serde_json::json!({ "title": "Vigil" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("starts_at"), "got {body}");
}

#[sqlx::test(migrations = "./migrations")]
async fn event_get_and_delete(pool: PgPool) {
    let state = helpers::test_state(pool.clone()).await;
    let app = helpers::test_router(state);
    let admin = helpers::admin_login(&app).await;
    let (_, pastor) =
        helpers::create_user(&app, &pool, "P", "p@example.org", &[Role::Pastor]).await;

    let id = create_event(&app, &admin, "Easter Convention", 10).await;

    let (status, body) = helpers::get_json(&app, "", "/api/events/get/easter-convention").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());

    let (status, _) = helpers::delete_json(&app, &pastor, &format!("/api/events/delete/{id}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = helpers::get_json(&app, "", &format!("/api/events/get/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
