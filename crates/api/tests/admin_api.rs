//! Integration tests for the `/api/v1/admin` endpoints.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, delete_json, get, post_json, send_json, TestOptions, IMAGE_URL};
use dermalens_core::types::AppEnv;
use serde_json::json;

#[tokio::test]
async fn lists_breaker_snapshots() {
    let app = common::build_test_app();

    let response = get(&app.router, "/api/v1/admin/breakers").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let snapshots = json.as_array().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["name"], "acne-detector");
    assert_eq!(snapshots[0]["state"], "closed");
    assert_eq!(snapshots[0]["window_requests"], 0);
    assert!(snapshots[1]["error_percentage"].is_number());
}

#[tokio::test]
async fn invalidating_the_cache_forces_a_miss() {
    let app = common::build_test_app();
    post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    assert_eq!(app.cache.local_len(), 1);

    let response = delete_json(
        &app.router,
        "/api/v1/admin/cache",
        json!({ "pattern": "*face.jpg" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["invalidated"], 1);
    assert_eq!(app.cache.local_len(), 0);

    let again = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    assert_eq!(common::header(&again, "x-cache"), Some("MISS"));
    assert_eq!(app.stubs.acne.calls(), 2);
}

#[tokio::test]
async fn empty_pattern_is_a_bad_request() {
    let app = common::build_test_app();

    let response = delete_json(&app.router, "/api/v1/admin/cache", json!({ "pattern": " " })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn configured_admin_token_is_enforced() {
    let mut config = common::test_config();
    config.admin_token = Some("s3cret".into());
    let app = common::build_test_app_with(TestOptions {
        config: Some(config),
        ..TestOptions::default()
    });

    let anonymous = get(&app.router, "/api/v1/admin/breakers").await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let wrong = send_json(
        &app.router,
        Method::DELETE,
        "/api/v1/admin/cache",
        json!({ "pattern": "*" }),
        &[("authorization", "Bearer nope")],
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let allowed = send_json(
        &app.router,
        Method::DELETE,
        "/api/v1/admin/cache",
        json!({ "pattern": "*" }),
        &[("authorization", "Bearer s3cret")],
    )
    .await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn production_without_admin_token_closes_admin_endpoints() {
    let mut config = common::test_config();
    config.app_env = AppEnv::Production;
    config.admin_token = None;
    let app = common::build_test_app_with(TestOptions {
        config: Some(config),
        ..TestOptions::default()
    });

    let breakers = get(&app.router, "/api/v1/admin/breakers").await;
    assert_eq!(breakers.status(), StatusCode::UNAUTHORIZED);

    let invalidate = delete_json(&app.router, "/api/v1/admin/cache", json!({ "pattern": "*" })).await;
    assert_eq!(invalidate.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(invalidate).await["code"], "UNAUTHORIZED");
}
