// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use fieldops_sync::error::SyncError;

#[test]
fn test_recoverable_kinds() {
    assert!(SyncError::Transient("timeout".to_string()).is_recoverable());
    assert!(SyncError::Protocol("bad json".to_string()).is_recoverable());
    assert!(SyncError::Blocked.is_recoverable());

    assert!(!SyncError::AuthFailure.is_recoverable());
    assert!(!SyncError::Expired.is_recoverable());
    assert!(!SyncError::Cancelled.is_recoverable());
    assert!(!SyncError::Storage("disk".to_string()).is_recoverable());
}

#[test]
fn test_auth_failure_kinds() {
    assert!(SyncError::AuthFailure.is_auth_failure());
    assert!(SyncError::Expired.is_auth_failure());
    assert!(!SyncError::NotAuthenticated.is_auth_failure());
    assert!(!SyncError::Blocked.is_auth_failure());
}

#[test]
fn test_status_mapping() {
    let cases = [
        (SyncError::AuthFailure, StatusCode::UNAUTHORIZED),
        (SyncError::Expired, StatusCode::UNAUTHORIZED),
        (SyncError::NotAuthenticated, StatusCode::UNAUTHORIZED),
        (SyncError::Blocked, StatusCode::SERVICE_UNAVAILABLE),
        (SyncError::Transient("x".to_string()), StatusCode::BAD_GATEWAY),
        (SyncError::Protocol("x".to_string()), StatusCode::BAD_GATEWAY),
        (SyncError::Cancelled, StatusCode::REQUEST_TIMEOUT),
        (
            SyncError::Storage("x".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];
    for (err, status) in cases {
        let kind = err.kind();
        assert_eq!(err.into_response().status(), status, "{}", kind);
    }
}

#[tokio::test]
async fn test_storage_details_not_exposed() {
    let response = SyncError::Storage("/var/secret/path locked".to_string()).into_response();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, serde_json::json!({"error": "storage"}));
}

#[test]
fn test_serde_error_maps_to_storage() {
    let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
    assert_eq!(err.kind(), "storage");
}
