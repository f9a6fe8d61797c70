// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync error taxonomy with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every failure the sync core can report.
///
/// The set is closed: callers match on the kind to decide between
/// substituting cache, prompting for login, or surfacing the failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The remote rejected the credential (401/403 or an auth-failure body).
    #[error("Credential rejected by the remote API")]
    AuthFailure,

    /// The credential timed out locally; no request was made.
    #[error("Credential has expired")]
    Expired,

    /// An external "service blocked" flag is set.
    #[error("API access is blocked")]
    Blocked,

    /// No credential at all for an operation that needs one.
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Transient API failure: {0}")]
    Transient(String),

    #[error("Unexpected API response: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True for failures that mean the credential can no longer be used.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::AuthFailure | SyncError::Expired)
    }

    /// True when a caller may substitute cached data for this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::Protocol(_) | SyncError::Blocked
        )
    }

    /// Stable machine-readable kind, used in API responses and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::AuthFailure => "auth_failure",
            SyncError::Expired => "expired",
            SyncError::Blocked => "blocked",
            SyncError::NotAuthenticated => "not_authenticated",
            SyncError::Transient(_) => "transient",
            SyncError::Protocol(_) => "protocol",
            SyncError::Storage(_) => "storage",
            SyncError::Cancelled => "cancelled",
            SyncError::Config(_) => "config",
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            SyncError::AuthFailure | SyncError::Expired | SyncError::NotAuthenticated => {
                (StatusCode::UNAUTHORIZED, None)
            }
            SyncError::Blocked => (StatusCode::SERVICE_UNAVAILABLE, None),
            SyncError::Transient(msg) | SyncError::Protocol(msg) => {
                (StatusCode::BAD_GATEWAY, Some(msg.clone()))
            }
            SyncError::Cancelled => (StatusCode::REQUEST_TIMEOUT, None),
            SyncError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            SyncError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(format!("serialization: {}", err))
    }
}

/// Result type alias for the sync core
pub type Result<T> = std::result::Result<T, SyncError>;
