//! Integration tests for `POST /infer`.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::{body_json, header, post_json, send_json, TestOptions, IMAGE_URL};
use dermalens_api::config::RateLimitConfig;
use serde_json::json;

// ---------------------------------------------------------------------------
// Synchronous path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn miss_then_hit_calls_detectors_once() {
    let app = common::build_test_app();

    let first = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-cache"), Some("MISS"));
    let body = body_json(first).await;
    assert_eq!(body["cache_status"], "MISS");
    assert_eq!(body["image_url"], IMAGE_URL);
    assert_eq!(body["acne_metrics"]["counts"]["Papules"], 1);
    assert_eq!(body["acne_metrics"]["counts"]["Pustules"], 1);
    assert_eq!(body["acne_metrics"]["severity"], "Mild");
    assert_eq!(body["acne_metrics"]["classification"], "papulopustolosa");
    assert_eq!(body["redness"]["redness_perc"], 5.0);
    assert_eq!(body["fallbacks"], json!({"acne": false, "redness": false, "wrinkles": false}));
    assert!(body["processing_time_ms"].is_u64());

    let second = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-cache"), Some("HIT"));
    assert_eq!(body_json(second).await["cache_status"], "HIT");

    assert_eq!(app.stubs.acne.calls(), 1);
    assert_eq!(app.stubs.images.calls(), 1);
}

#[tokio::test]
async fn query_string_does_not_split_the_cache() {
    let app = common::build_test_app();

    post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    let signed = format!("{IMAGE_URL}?sv=2024&sp=r&sig=abc");
    let response = post_json(&app.router, "/infer", json!({ "imageUrl": signed })).await;

    assert_eq!(header(&response, "x-cache"), Some("HIT"));
    assert_eq!(body_json(response).await["image_url"], signed);
}

#[tokio::test]
async fn recommendation_failure_is_reported_not_raised() {
    let app = common::build_test_app();
    app.stubs.recommendations.fail("recommender down");

    let response = post_json(
        &app.router,
        "/infer",
        json!({ "imageUrl": IMAGE_URL, "includeRecommendations": true }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["recommendations_meta"]["success"], false);
    assert_eq!(body["recommendations"]["skincare_routine"], json!([]));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn untrusted_image_reference_is_rejected_before_any_call() {
    let app = common::build_test_app();

    let response = post_json(
        &app.router,
        "/infer",
        json!({ "imageUrl": "ftp://files.example.com/face.jpg" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert_eq!(app.stubs.images.calls(), 0);
    assert_eq!(app.stubs.acne.calls(), 0);
}

#[tokio::test]
async fn token_without_read_permission_is_rejected() {
    let app = common::build_test_app();
    let url = format!("{IMAGE_URL}?sp=w&sig=abc");

    let response = post_json(&app.router, "/infer", json!({ "imageUrl": url })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = common::build_test_app();

    let response = send_json(
        &app.router,
        Method::POST,
        "/infer",
        json!({ "imageUrl": 42 }),
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Asynchronous path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn async_request_is_queued_with_202() {
    let app = common::build_test_app_with(TestOptions {
        with_queue: true,
        ..TestOptions::default()
    });

    let response = post_json(
        &app.router,
        "/infer",
        json!({
            "imageUrl": IMAGE_URL,
            "sync": false,
            "userId": "u-1",
            "webhookUrl": "https://hooks.example.com/done"
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["jobId"].as_str().unwrap().len(), 36);

    assert_eq!(app.queue.as_ref().unwrap().len(), 1);
    assert_eq!(app.stubs.acne.calls(), 0);
}

#[tokio::test]
async fn async_request_without_queue_runs_inline() {
    let app = common::build_test_app();

    let response = post_json(
        &app.router,
        "/infer",
        json!({ "imageUrl": IMAGE_URL, "sync": false }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), Some("MISS"));
}

// ---------------------------------------------------------------------------
// Degraded dependencies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acne_failure_falls_back_and_is_not_cached() {
    let app = common::build_test_app();
    app.stubs.acne.fail("detector down");

    let response = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), Some("FALLBACK"));
    let body = body_json(response).await;
    assert_eq!(body["fallbacks"]["acne"], true);
    assert_eq!(body["roboflow"]["predictions"], json!([]));
    assert_eq!(app.cache.local_len(), 0);
}

#[tokio::test]
async fn source_image_failure_with_closed_breaker_is_503() {
    let app = common::build_test_app();
    app.stubs.images.fail("origin unreachable");

    let response = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header(&response, "retry-after"), Some("30"));
    let body = body_json(response).await;
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(body["retryAfter"], 30);
}

#[tokio::test]
async fn open_acne_breaker_recovers_a_fallback_result() {
    let app = common::build_test_app();
    app.stubs.acne.fail("detector down");

    // Two requests of three attempts each trip the breaker (volume 5, >50 %).
    for _ in 0..2 {
        post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    }
    let breakers = body_json(common::get(&app.router, "/api/v1/admin/breakers").await).await;
    assert_eq!(breakers[0]["state"], "open");

    app.stubs.images.fail("origin unreachable");
    let response = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), Some("FALLBACK"));
    let body = body_json(response).await;
    assert_eq!(body["fallbacks"], json!({"acne": true, "redness": true, "wrinkles": true}));
}

#[tokio::test(start_paused = true)]
async fn hung_wrinkle_detector_degrades_only_its_branch() {
    let app = common::build_test_app();
    app.stubs.wrinkles.set_delay(Duration::from_secs(3600));

    let response = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), Some("MISS"));
    let body = body_json(response).await;
    assert_eq!(body["fallbacks"], json!({"acne": false, "redness": false, "wrinkles": true}));
    assert_eq!(body["acne_metrics"]["counts"]["Papules"], 1);
    assert_eq!(app.stubs.acne.calls(), 1);
    assert_eq!(app.cache.local_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pipeline_finishes_after_the_client_goes_away() {
    let app = common::build_test_app();
    app.stubs.acne.set_delay(Duration::from_secs(5));

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(app.cache.local_len(), 1);
    let again = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
    assert_eq!(app.stubs.acne.calls(), 1);
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

fn limited_app(max_requests: u32) -> common::TestApp {
    let mut config = common::test_config();
    config.rate_limit = RateLimitConfig {
        max_requests,
        window: Duration::from_secs(60),
        bypass: false,
    };
    common::build_test_app_with(TestOptions {
        config: Some(config),
        ..TestOptions::default()
    })
}

#[tokio::test]
async fn allowed_responses_carry_rate_limit_headers() {
    let app = limited_app(3);
    let user = [("x-user-id", "u-7")];

    let first = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": IMAGE_URL }), &user).await;
    let second = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": IMAGE_URL }), &user).await;

    assert_eq!(header(&first, "x-ratelimit-limit"), Some("3"));
    assert_eq!(header(&first, "x-ratelimit-remaining"), Some("2"));
    assert_eq!(header(&second, "x-ratelimit-remaining"), Some("1"));
    assert!(header(&second, "x-ratelimit-reset").is_some());
}

#[tokio::test]
async fn request_over_the_limit_is_429() {
    let app = limited_app(2);
    let user = [("x-user-id", "u-8")];

    for _ in 0..2 {
        let ok = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": IMAGE_URL }), &user).await;
        assert_eq!(ok.status(), StatusCode::OK);
    }
    let denied = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": IMAGE_URL }), &user).await;

    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&denied, "x-ratelimit-remaining"), Some("0"));
    assert!(header(&denied, "retry-after").is_some());
    assert_eq!(body_json(denied).await["code"], "RATE_LIMITED");

    // Another client has its own window.
    let other = send_json(
        &app.router,
        Method::POST,
        "/infer",
        json!({ "imageUrl": IMAGE_URL }),
        &[("x-forwarded-for", "198.51.100.4")],
    )
    .await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_runs_before_validation() {
    let app = limited_app(1);
    let user = [("x-user-id", "u-9")];

    let bad = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": "nope" }), &user).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let next = send_json(&app.router, Method::POST, "/infer", json!({ "imageUrl": IMAGE_URL }), &user).await;
    assert_eq!(next.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn bypass_mode_never_limits() {
    let mut config = common::test_config();
    config.rate_limit = RateLimitConfig {
        max_requests: 1,
        window: Duration::from_secs(60),
        bypass: true,
    };
    let app = common::build_test_app_with(TestOptions {
        config: Some(config),
        ..TestOptions::default()
    });

    for _ in 0..3 {
        let response = post_json(&app.router, "/infer", json!({ "imageUrl": IMAGE_URL })).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-ratelimit-limit").is_none());
    }
}
