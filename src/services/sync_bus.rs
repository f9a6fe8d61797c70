// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cross-context signalling of credential changes.
//!
//! Peer contexts ("tabs") sharing one session storage also share one bus.
//! Delivery is best-effort: a lagging subscriber drops signals and relies on
//! the watchdog to converge.

use crate::db::session_keys;
use crate::db::SessionStorage;
use crate::time_utils::format_utc_rfc3339;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// Identifies the context that published a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OriginId(u64);

impl OriginId {
    pub fn next() -> Self {
        OriginId(NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSignal {
    Set,
    Cleared,
    Invalidated,
}

impl CredentialSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSignal::Set => "set",
            CredentialSignal::Cleared => "cleared",
            CredentialSignal::Invalidated => "invalidated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusMessage {
    pub origin: OriginId,
    pub signal: CredentialSignal,
}

/// Broadcast bus shared by every context of one origin.
#[derive(Clone)]
pub struct SyncBus {
    sender: broadcast::Sender<BusMessage>,
    storage: Arc<dyn SessionStorage>,
}

impl SyncBus {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender, storage }
    }

    /// Publish a signal and touch the `auth_sync` trigger key.
    pub fn publish(&self, origin: OriginId, signal: CredentialSignal) {
        let stamp = format!("{}:{}", signal.as_str(), format_utc_rfc3339(Utc::now()));
        if let Err(e) = self.storage.set(session_keys::AUTH_SYNC, &stamp) {
            tracing::debug!(error = %e, "Could not record auth sync trigger");
        }

        // No subscribers is fine
        let _ = self.sender.send(BusMessage { origin, signal });
        tracing::debug!(origin = origin.0, signal = signal.as_str(), "Published credential signal");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Last trigger written by any context, as `signal:timestamp`.
    pub fn last_trigger(&self) -> Option<String> {
        self.storage.get(session_keys::AUTH_SYNC)
    }
}
