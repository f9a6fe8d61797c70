// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth login, callback, and logout routes.

use axum::{
    extract::{OriginalUri, Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::models::AuthState;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", get(auth_start))
        .route("/auth/callback", get(auth_callback))
        .route("/auth/logout", post(logout))
}

/// Query parameters for starting the OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Path to return to once the callback has been handled.
    #[serde(default)]
    return_path: Option<String>,
}

/// Start OAuth flow - redirect to the backend's login page.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
) -> Redirect {
    let login_url = state.facade.login(params.return_path.as_deref());
    Redirect::temporary(&login_url)
}

/// OAuth callback - install the credential, then send the UI back where it was.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
) -> Result<Redirect> {
    // Rebuild the absolute URL the browser was sent to
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost:8080");
    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    let callback_url = format!("{}://{}{}", scheme, host, uri);

    let completion = state.facade.complete_oauth_callback(&callback_url).await?;
    tracing::info!(
        state = %completion.auth_state,
        return_path = %completion.return_path,
        "OAuth callback handled"
    );

    let redirect = format!(
        "{}{}",
        state.config.frontend_url.trim_end_matches('/'),
        completion.return_path
    );
    Ok(Redirect::temporary(&redirect))
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub state: AuthState,
}

/// Logout - drop the credential and the cache.
async fn logout(State(state): State<Arc<AppState>>) -> Json<LogoutResponse> {
    let auth_state = state.facade.logout().await;
    tracing::info!(state = %auth_state, "Logged out");
    Json(LogoutResponse { state: auth_state })
}
