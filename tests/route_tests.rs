// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP surface tests.
//!
//! These tests verify that:
//! 1. Facade routes carry the health headers
//! 2. Errors map onto status codes with a machine-readable kind
//! 3. The OAuth routes redirect where the UI expects

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use fieldops_sync::middleware::health::{AUTH_STATE_HEADER, QUEUE_LENGTH_HEADER};
use fieldops_sync::models::AuthState;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{create_test_app, Harness};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_dashboard_carries_health_headers() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/dashboard")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[AUTH_STATE_HEADER], "no_data");
    assert_eq!(headers[QUEUE_LENGTH_HEADER], "0");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let body = body_json(response).await;
    assert_eq!(body["cards"], json!([]));
    assert_eq!(body["lastSync"], Value::Null);
    assert_eq!(harness.request_count().await, 0);
}

#[tokio::test]
async fn test_sync_without_credential_is_unauthorized() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body, json!({"error": "not_authenticated"}));
}

#[tokio::test]
async fn test_sync_reports_cards() {
    let harness = Harness::start().await;
    harness.mount_two_section_camp().await;
    let (app, state) = create_test_app(&harness).await;
    harness.sign_in(&state.facade);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[AUTH_STATE_HEADER], "authenticated");
    let body = body_json(response).await;
    assert_eq!(body["sections"], 2);
    assert_eq!(body["cards"][0]["id"], "Camp_100");
}

#[tokio::test]
async fn test_members_route_splits_sections() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"scoutid": 5, "firstname": "Ada", "sectionIds": [1]}
        ])))
        .expect(1)
        .mount(&harness.server)
        .await;
    let (app, state) = create_test_app(&harness).await;
    harness.sign_in(&state.facade);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/members?sections=2,1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_auth_state_route() {
    let harness = Harness::start().await;
    let (app, state) = create_test_app(&harness).await;
    harness.sign_in(&state.facade);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/auth/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["state"], "authenticated");
    assert_eq!(body["choice_pending"], false);
}

#[tokio::test]
async fn test_relogin_choice_returns_login_url() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/choice")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"choice": "relogin", "return_path": "/members"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choice"], "relogin");
    let login_url = body["login_url"].as_str().unwrap();
    assert!(login_url.starts_with(&format!("{}/oauth/login?state=prod", harness.server.uri())));
}

#[tokio::test]
async fn test_unknown_choice_is_rejected() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/choice")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"choice": "shrug"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_queue_stats_route() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/queue/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(
        body,
        json!({"queueLength": 0, "processing": 0, "totalRequests": 0})
    );
}

#[tokio::test]
async fn test_login_redirects_to_backend() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/login?return_path=/events")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.contains("/oauth/login?state=prod&frontend_url=http%3A%2F%2Flocalhost%3A3000"));
}

#[tokio::test]
async fn test_callback_redirects_to_return_path() {
    let harness = Harness::start().await;
    harness.mount_startup().await;
    Mock::given(method("GET"))
        .and(path("/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&harness.server)
        .await;
    let (app, state) = create_test_app(&harness).await;
    state.facade.login(Some("/events"));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?access_token=abc&expires_in=600")
                .header(header::HOST, "localhost:8080")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://localhost:3000/events"
    );
    assert_eq!(state.facade.current_auth_state(), AuthState::Authenticated);
    assert_eq!(state.facade.credentials().get().unwrap().token, "abc");
}

#[tokio::test]
async fn test_foreign_return_path_lands_on_root() {
    let harness = Harness::start().await;
    harness.mount_startup().await;
    Mock::given(method("GET"))
        .and(path("/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&harness.server)
        .await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/login?return_path=@evil.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?access_token=abc&expires_in=600")
                .header(header::HOST, "localhost:8080")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://localhost:3000/"
    );
}

#[tokio::test]
async fn test_callback_without_token_is_bad_gateway() {
    let harness = Harness::start().await;
    let (app, _) = create_test_app(&harness).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?error=access_denied")
                .header(header::HOST, "localhost:8080")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "protocol");
}

#[tokio::test]
async fn test_logout_route() {
    let harness = Harness::start().await;
    let (app, state) = create_test_app(&harness).await;
    harness.sign_in(&state.facade);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["state"], "no_data");
    assert!(!state.facade.credentials().is_present());
}
