// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Facade routes used by the UI.

use crate::error::Result;
use crate::models::{AuthState, Member, UserIdentity};
use crate::services::{Dashboard, ForcedChoice, QueueStats, SyncReport};
use crate::AppState;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/dashboard", get(get_dashboard))
        .route("/api/members", get(get_members))
        .route("/api/sync", post(sync_all))
        .route("/api/auth/state", get(get_auth_state))
        .route("/api/auth/choice", post(resolve_choice))
        .route("/api/queue/stats", get(get_queue_stats))
}

// ─── Dashboard ───────────────────────────────────────────────

async fn get_dashboard(State(state): State<Arc<AppState>>) -> Result<Json<Dashboard>> {
    let dashboard = state.facade.get_dashboard().await?;
    tracing::debug!(cards = dashboard.cards.len(), "Dashboard served");
    Ok(Json(dashboard))
}

// ─── Members ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct MembersQuery {
    /// Comma-separated section ids
    #[serde(default)]
    sections: String,
}

fn parse_section_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn get_members(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MembersQuery>,
) -> Result<Json<Vec<Member>>> {
    let section_ids = parse_section_ids(&params.sections);
    if section_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }
    let members = state.facade.get_members_for_sections(&section_ids).await?;
    Ok(Json(members))
}

// ─── Sync ────────────────────────────────────────────────────

async fn sync_all(State(state): State<Arc<AppState>>) -> Result<Json<SyncReport>> {
    tracing::info!("User-initiated sync");
    let report = state.facade.sync_all().await?;
    Ok(Json(report))
}

// ─── Auth ────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct AuthStateResponse {
    pub state: AuthState,
    /// The user must pick between logging in again and staying offline
    pub choice_pending: bool,
    pub user: Option<UserIdentity>,
}

async fn get_auth_state(State(state): State<Arc<AppState>>) -> Json<AuthStateResponse> {
    let auth_state = state.facade.get_auth_state().await;
    Json(AuthStateResponse {
        state: auth_state,
        choice_pending: state.facade.choice_pending(),
        user: state.facade.user_identity().await,
    })
}

#[derive(Deserialize)]
struct ChoiceRequest {
    choice: ForcedChoice,
    #[serde(default)]
    return_path: Option<String>,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ChoiceResponse {
    pub choice: ForcedChoice,
    /// Where to send the browser for `relogin`
    pub login_url: Option<String>,
}

async fn resolve_choice(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChoiceRequest>,
) -> Json<ChoiceResponse> {
    let login_url = state
        .facade
        .resolve_forced_choice(request.choice, request.return_path.as_deref());
    Json(ChoiceResponse {
        choice: request.choice,
        login_url,
    })
}

// ─── Queue ───────────────────────────────────────────────────

async fn get_queue_stats(State(state): State<Arc<AppState>>) -> Json<QueueStats> {
    Json(state.facade.queue_stats())
}
