// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bearer credential storage.
//!
//! The token lives in session storage so peer contexts see the same value.
//! An in-memory mirror takes over while session storage rejects writes.

use crate::db::session_keys;
use crate::db::SessionStorage;
use crate::models::Credential;
use crate::services::breaker::Breaker;
use crate::services::sync_bus::{CredentialSignal, OriginId, SyncBus};
use crate::time_utils::{format_utc_rfc3339, SharedClock};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Token reported in demo mode.
pub const DEMO_TOKEN: &str = "demo-mode-token";

pub struct CredentialStore {
    storage: Arc<dyn SessionStorage>,
    memory: Mutex<Option<Credential>>,
    degraded: AtomicBool,
    demo: bool,
    clock: SharedClock,
    breaker: Arc<Breaker>,
    bus: SyncBus,
    origin: OriginId,
    default_lifetime: Duration,
}

impl CredentialStore {
    pub fn new(
        storage: Arc<dyn SessionStorage>,
        demo: bool,
        clock: SharedClock,
        breaker: Arc<Breaker>,
        bus: SyncBus,
        origin: OriginId,
        default_lifetime: Duration,
    ) -> Self {
        Self {
            storage,
            memory: Mutex::new(None),
            degraded: AtomicBool::new(false),
            demo,
            clock,
            breaker,
            bus,
            origin,
            default_lifetime,
        }
    }

    pub fn get(&self) -> Option<Credential> {
        if self.demo {
            return Some(Credential {
                token: DEMO_TOKEN.to_string(),
                token_type: "Bearer".to_string(),
                expires_at: DateTime::<Utc>::MAX_UTC,
                invalid: false,
            });
        }

        if self.degraded.load(Ordering::SeqCst) {
            return self.memory.lock().ok().and_then(|m| m.clone());
        }
        self.read_storage()
    }

    fn read_storage(&self) -> Option<Credential> {
        let token = self.storage.get(session_keys::ACCESS_TOKEN)?;
        let expires_at = self
            .storage
            .get(session_keys::TOKEN_EXPIRES_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            // Unparseable expiry: treat as already expired
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Some(Credential {
            token,
            token_type: self
                .storage
                .get(session_keys::TOKEN_TYPE)
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at,
            invalid: self
                .storage
                .get(session_keys::TOKEN_INVALID)
                .is_some_and(|v| v == "true"),
        })
    }

    /// Install a new credential.
    ///
    /// Resets the breaker and the invalid flag, forgets any pending expiry
    /// choice, and signals peer contexts.
    pub fn set(&self, token: &str, token_type: &str, expires_in_secs: Option<i64>) -> Credential {
        let now = self.clock.now();
        // Lifetimes past the representable range fall back to the default
        let expires_at = expires_in_secs
            .filter(|s| *s > 0)
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .or_else(|| now.checked_add_signed(self.default_lifetime))
            .unwrap_or(now);
        let credential = Credential {
            token: token.to_string(),
            token_type: token_type.to_string(),
            expires_at,
            invalid: false,
        };

        let expires = format_utc_rfc3339(credential.expires_at);
        let written = self.write(session_keys::ACCESS_TOKEN, token)
            && self.write(session_keys::TOKEN_TYPE, token_type)
            && self.write(session_keys::TOKEN_EXPIRES_AT, &expires);
        self.storage.remove(session_keys::TOKEN_INVALID);
        self.storage.remove(session_keys::TOKEN_EXPIRED);
        self.storage.remove(session_keys::TOKEN_EXPIRATION_CHOICE);

        if let Ok(mut memory) = self.memory.lock() {
            *memory = Some(credential.clone());
        }
        self.degraded.store(!written, Ordering::SeqCst);

        self.breaker.reset();
        tracing::info!(expires_at = %expires, "Credential installed");
        self.bus.publish(self.origin, CredentialSignal::Set);
        credential
    }

    pub fn clear(&self) {
        for key in [
            session_keys::ACCESS_TOKEN,
            session_keys::TOKEN_TYPE,
            session_keys::TOKEN_EXPIRES_AT,
            session_keys::TOKEN_INVALID,
        ] {
            self.storage.remove(key);
        }
        if let Ok(mut memory) = self.memory.lock() {
            *memory = None;
        }
        self.degraded.store(false, Ordering::SeqCst);

        tracing::info!("Credential cleared");
        self.bus.publish(self.origin, CredentialSignal::Cleared);
    }

    /// Flag the credential as rejected. The token itself is kept.
    pub fn mark_invalid(&self) {
        if self.demo || self.get().map_or(true, |c| c.invalid) {
            return;
        }
        if !self.write(session_keys::TOKEN_INVALID, "true") {
            self.degraded.store(true, Ordering::SeqCst);
        }
        if let Ok(mut memory) = self.memory.lock() {
            if let Some(cred) = memory.as_mut() {
                cred.invalid = true;
            }
        }

        tracing::warn!("Credential marked invalid");
        self.bus.publish(self.origin, CredentialSignal::Invalidated);
    }

    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }

    pub fn is_usable(&self) -> bool {
        let now = self.clock.now();
        self.get().is_some_and(|c| c.is_usable(now))
    }

    pub fn is_expired(&self) -> bool {
        let now = self.clock.now();
        self.get().is_some_and(|c| c.is_expired(now))
    }

    pub fn is_invalid(&self) -> bool {
        self.get().is_some_and(|c| c.invalid)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.get().map(|c| c.expires_at)
    }

    /// The credential if it may be sent to the remote right now.
    pub fn usable(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.get().filter(|c| c.is_usable(now))
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    fn write(&self, key: &str, value: &str) -> bool {
        match self.storage.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Session storage write failed, using memory");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySessionStorage;
    use crate::time_utils::{Clock, MockClock};

    struct Fixture {
        storage: MemorySessionStorage,
        clock: MockClock,
        breaker: Arc<Breaker>,
        bus: SyncBus,
        store: CredentialStore,
    }

    fn fixture(demo: bool) -> Fixture {
        let storage = MemorySessionStorage::new();
        let shared: Arc<dyn SessionStorage> = Arc::new(storage.clone());
        let clock = MockClock::default();
        let breaker = Arc::new(Breaker::new(shared.clone()));
        let bus = SyncBus::new(shared.clone());
        let store = CredentialStore::new(
            shared,
            demo,
            Arc::new(clock.clone()),
            breaker.clone(),
            bus.clone(),
            OriginId::next(),
            Duration::hours(1),
        );
        Fixture {
            storage,
            clock,
            breaker,
            bus,
            store,
        }
    }

    #[test]
    fn test_set_defaults_lifetime_and_persists() {
        let f = fixture(false);
        let cred = f.store.set("tok", "Bearer", None);

        assert_eq!(cred.expires_at, f.clock.now() + Duration::hours(1));
        assert_eq!(f.storage.get(session_keys::ACCESS_TOKEN).as_deref(), Some("tok"));
        assert!(f.store.is_usable());
        assert_eq!(f.store.expires_at(), Some(cred.expires_at));
    }

    #[test]
    fn test_oversized_lifetime_uses_default() {
        let f = fixture(false);
        let cred = f.store.set("tok", "Bearer", Some(9_223_372_036_854_775));
        assert_eq!(cred.expires_at, f.clock.now() + Duration::hours(1));

        let cred = f.store.set("tok", "Bearer", Some(i64::MAX));
        assert_eq!(cred.expires_at, f.clock.now() + Duration::hours(1));
        assert!(f.store.is_usable());
    }

    #[test]
    fn test_expiry_follows_clock() {
        let f = fixture(false);
        f.store.set("tok", "Bearer", Some(60));
        assert!(!f.store.is_expired());

        f.clock.advance(Duration::seconds(61));
        assert!(f.store.is_expired());
        assert!(!f.store.is_usable());
        assert!(f.store.is_present());
    }

    #[test]
    fn test_mark_invalid_keeps_token() {
        let f = fixture(false);
        f.store.set("tok", "Bearer", Some(3600));
        f.store.mark_invalid();

        let cred = f.store.get().unwrap();
        assert_eq!(cred.token, "tok");
        assert!(cred.invalid);
        assert!(!f.store.is_usable());
        assert!(f.store.usable().is_none());
    }

    #[test]
    fn test_set_resets_breaker_and_invalid_flag() {
        let f = fixture(false);
        f.store.set("old", "Bearer", Some(3600));
        f.breaker.handle_response(401, None);
        f.store.mark_invalid();
        assert!(f.breaker.has_failed());

        f.store.set("new", "Bearer", Some(3600));
        assert!(!f.breaker.has_failed());
        assert!(f.store.is_usable());
        assert!(!f.store.is_invalid());
    }

    #[test]
    fn test_clear_removes_everything_and_signals() {
        let f = fixture(false);
        let mut rx = f.bus.subscribe();
        f.store.set("tok", "Bearer", None);
        f.store.clear();

        assert!(f.store.get().is_none());
        assert_eq!(rx.try_recv().unwrap().signal, CredentialSignal::Set);
        assert_eq!(rx.try_recv().unwrap().signal, CredentialSignal::Cleared);
    }

    #[test]
    fn test_falls_back_to_memory_when_storage_rejects_writes() {
        let f = fixture(false);
        f.storage.set_fail_writes(true);
        f.store.set("tok", "Bearer", Some(3600));

        assert!(f.storage.get(session_keys::ACCESS_TOKEN).is_none());
        assert!(f.store.is_usable());
        assert_eq!(f.store.get().unwrap().token, "tok");
    }

    #[test]
    fn test_demo_mode_is_always_usable() {
        let f = fixture(true);
        assert!(f.store.is_usable());
        assert_eq!(f.store.get().unwrap().token, DEMO_TOKEN);
        f.store.mark_invalid();
        assert!(f.store.is_usable());
    }

    #[test]
    fn test_peer_store_sees_credential() {
        let f = fixture(false);
        let peer = CredentialStore::new(
            Arc::new(f.storage.clone()),
            false,
            Arc::new(f.clock.clone()),
            f.breaker.clone(),
            f.bus.clone(),
            OriginId::next(),
            Duration::hours(1),
        );
        f.store.set("shared", "Bearer", None);
        assert_eq!(peer.get().unwrap().token, "shared");

        f.store.clear();
        assert!(peer.get().is_none());
    }
}
