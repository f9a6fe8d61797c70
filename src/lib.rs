// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fieldops-Sync: offline-first sync and caching core
//!
//! This crate keeps a field-operations client usable without connectivity:
//! it pulls sections, terms, events, attendance, and members from the
//! activity-management API through a paced request queue, caches them
//! durably, and serves the dashboard from the cache while tracking whether
//! the user's credential is still good.

pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::SyncFacade;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub facade: Arc<SyncFacade>,
}
