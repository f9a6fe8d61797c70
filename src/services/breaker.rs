// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorization circuit breaker.
//!
//! Trips on the first 401/403 (or auth-failure body) and blocks every further
//! API call until a new credential is installed. Callbacks registered with
//! `on_auth_error` fire exactly once per trip.

use crate::db::session_keys;
use crate::db::SessionStorage;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type AuthErrorCallback = Box<dyn Fn() + Send + Sync>;

/// Outcome of inspecting one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    Ok,
    AuthFailure,
}

pub struct Breaker {
    tripped: AtomicBool,
    trips: AtomicU64,
    storage: Arc<dyn SessionStorage>,
    callbacks: Mutex<Vec<AuthErrorCallback>>,
}

impl Breaker {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            tripped: AtomicBool::new(false),
            trips: AtomicU64::new(0),
            storage,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Inspect a response status and (optionally) its parsed body.
    pub fn handle_response(&self, status: u16, body: Option<&Value>) -> ResponseVerdict {
        let auth_failure =
            status == 401 || status == 403 || body.is_some_and(body_indicates_auth_failure);
        if !auth_failure {
            return ResponseVerdict::Ok;
        }

        if !self.tripped.swap(true, Ordering::SeqCst) {
            let trip = self.trips.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(status, trip, "Authorization failure, breaker tripped");
            if let Ok(callbacks) = self.callbacks.lock() {
                for callback in callbacks.iter() {
                    callback();
                }
            }
        }
        ResponseVerdict::AuthFailure
    }

    /// Blocked takes precedence over the trip state.
    pub fn should_make_call(&self) -> bool {
        !self.is_blocked() && !self.has_failed()
    }

    pub fn has_failed(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Externally-set "service blocked" flag.
    pub fn is_blocked(&self) -> bool {
        self.storage
            .get(session_keys::BLOCKED)
            .is_some_and(|v| v == "true")
    }

    pub fn set_blocked(&self, blocked: bool) {
        if blocked {
            if let Err(e) = self.storage.set(session_keys::BLOCKED, "true") {
                tracing::warn!(error = %e, "Could not persist blocked flag");
            }
        } else {
            self.storage.remove(session_keys::BLOCKED);
        }
    }

    pub fn reset(&self) {
        if self.tripped.swap(false, Ordering::SeqCst) {
            tracing::info!("Breaker reset");
        }
    }

    pub fn on_auth_error(&self, callback: AuthErrorCallback) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// Number of trips since creation.
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }
}

/// Known in-body shapes the remote uses to reject a credential.
pub fn body_indicates_auth_failure(body: &Value) -> bool {
    let error = body.get("error");

    if body.get("status") == Some(&Value::Bool(false))
        && error
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
            .is_some_and(|code| code == "access-error-2")
    {
        return true;
    }

    let matches_text = |v: Option<&Value>, needle: &str| {
        v.and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case(needle))
    };

    matches_text(error, "Invalid access token")
        || matches_text(error, "Token expired")
        || matches_text(body.get("message"), "Unauthorized")
}
