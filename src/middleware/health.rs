// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health headers middleware.
//!
//! Every facade response tells the UI where auth and the queue stand, so
//! it can show a status indicator without extra round trips.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub const AUTH_STATE_HEADER: &str = "x-auth-state";
pub const QUEUE_LENGTH_HEADER: &str = "x-queue-length";

/// Add auth state, queue length, and no-store headers to the response.
pub async fn add_health_headers(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;

    let auth_state = state.facade.current_auth_state();
    let queue_length = state.facade.queue_stats().queue_length;
    let headers = response.headers_mut();

    headers.insert(
        AUTH_STATE_HEADER,
        HeaderValue::from_static(auth_state.as_str()),
    );
    headers.insert(QUEUE_LENGTH_HEADER, HeaderValue::from(queue_length));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    response
}
