// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication state machine.
//!
//! The state is a pure function of the credential, cache presence, and
//! whether a credential was lost this session (`derive_auth_state`).
//! `AuthMachine` re-evaluates it on demand, notifies listeners on change,
//! and raises the forced choice when a credential expires over cached data.

use crate::db::session_keys;
use crate::db::{PersistentStore, SessionStorage};
use crate::diagnostics::{self, Category, Level, SharedSink};
use crate::models::AuthState;
use crate::services::credentials::CredentialStore;
use crate::time_utils::{Clock, SharedClock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Inputs to the auth truth table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInputs {
    pub credential_present: bool,
    pub credential_usable: bool,
    /// Timed out or flagged invalid
    pub credential_expired: bool,
    pub cache_has_sections: bool,
    pub previously_authenticated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthDecision {
    pub state: AuthState,
    /// The credential is useless and there is nothing cached to protect
    pub clear_credential: bool,
}

/// Evaluate the auth truth table.
pub fn derive_auth_state(inputs: AuthInputs) -> AuthDecision {
    let decide = |state| AuthDecision {
        state,
        clear_credential: false,
    };

    if inputs.credential_present {
        if inputs.credential_usable && !inputs.credential_expired {
            return decide(AuthState::Authenticated);
        }
        if inputs.cache_has_sections {
            return decide(AuthState::TokenExpired);
        }
        return AuthDecision {
            state: AuthState::NoData,
            clear_credential: true,
        };
    }

    match (inputs.cache_has_sections, inputs.previously_authenticated) {
        (true, true) => decide(AuthState::TokenExpired),
        (true, false) => decide(AuthState::CachedOnly),
        (false, _) => decide(AuthState::NoData),
    }
}

/// Resolution of the forced choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ForcedChoice {
    Relogin,
    StayOffline,
}

impl ForcedChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForcedChoice::Relogin => "relogin",
            ForcedChoice::StayOffline => "stay_offline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "relogin" => Some(ForcedChoice::Relogin),
            "stay_offline" => Some(ForcedChoice::StayOffline),
            _ => None,
        }
    }
}

/// Events observable by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    StateChanged { from: AuthState, to: AuthState },
    ForcedChoiceRequired,
    LoginRequired { login_url: String },
}

pub type AuthListener = Arc<dyn Fn(AuthState) + Send + Sync>;

type ListenerMap = Mutex<HashMap<u64, AuthListener>>;

/// Handle returned by `on_auth_state_change`.
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut map) = listeners.lock() {
                map.remove(&self.id);
            }
        }
    }
}

pub struct AuthMachine {
    credentials: Arc<CredentialStore>,
    store: Arc<PersistentStore>,
    storage: Arc<dyn SessionStorage>,
    clock: SharedClock,
    sink: SharedSink,
    current: Mutex<AuthState>,
    listeners: Arc<ListenerMap>,
    next_listener: AtomicU64,
    events: broadcast::Sender<AuthEvent>,
    choice_raised: AtomicBool,
    operations: Mutex<CancellationToken>,
}

impl AuthMachine {
    pub fn new(
        credentials: Arc<CredentialStore>,
        store: Arc<PersistentStore>,
        storage: Arc<dyn SessionStorage>,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            credentials,
            store,
            storage,
            clock,
            sink,
            current: Mutex::new(AuthState::NoData),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
            events,
            choice_raised: AtomicBool::new(false),
            operations: Mutex::new(CancellationToken::new()),
        }
    }

    /// Last evaluated state. Never suspends.
    pub fn current(&self) -> AuthState {
        self.current
            .lock()
            .map(|s| *s)
            .unwrap_or(AuthState::NoData)
    }

    pub async fn inputs(&self) -> AuthInputs {
        let now = self.clock.now();
        let credential = self.credentials.get();
        AuthInputs {
            credential_present: credential.is_some(),
            credential_usable: credential.as_ref().is_some_and(|c| c.is_usable(now)),
            credential_expired: credential
                .as_ref()
                .is_some_and(|c| c.invalid || c.is_expired(now)),
            cache_has_sections: self.store.has_offline_data().await,
            previously_authenticated: self.storage.get(session_keys::TOKEN_EXPIRED).is_some(),
        }
    }

    /// Re-evaluate the state and apply its side effects.
    pub async fn evaluate(&self, trigger: &str) -> AuthState {
        let inputs = self.inputs().await;
        let decision = derive_auth_state(inputs);

        if inputs.credential_present && inputs.credential_expired {
            if let Err(e) = self.storage.set(session_keys::TOKEN_EXPIRED, "true") {
                tracing::warn!(error = %e, "Could not persist token_expired flag");
            }
        }
        if decision.clear_credential {
            tracing::info!(trigger, "Clearing unusable credential with no cached data");
            self.credentials.clear();
        }

        let previous = match self.current.lock() {
            Ok(mut current) => std::mem::replace(&mut *current, decision.state),
            Err(_) => decision.state,
        };

        if previous != decision.state {
            self.on_transition(previous, decision.state, trigger);
        }

        if decision.state == AuthState::TokenExpired {
            self.raise_forced_choice();
        } else {
            self.choice_raised.store(false, Ordering::SeqCst);
        }
        decision.state
    }

    fn on_transition(&self, from: AuthState, to: AuthState, trigger: &str) {
        tracing::info!(%from, %to, trigger, "Auth state changed");
        diagnostics::emit(
            self.sink.as_ref(),
            Level::Info,
            Category::Auth,
            "auth state changed",
            json!({ "from": from, "to": to, "trigger": trigger }),
        );

        // Work started under a good credential must not outlive it
        if from == AuthState::Authenticated
            && matches!(to, AuthState::TokenExpired | AuthState::NoData)
        {
            if let Ok(mut token) = self.operations.lock() {
                token.cancel();
                *token = CancellationToken::new();
            }
        }

        let listeners: Vec<AuthListener> = self
            .listeners
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(to);
        }
        let _ = self.events.send(AuthEvent::StateChanged { from, to });
    }

    fn raise_forced_choice(&self) {
        if self.stored_choice().is_some() {
            return;
        }
        if !self.choice_raised.swap(true, Ordering::SeqCst) {
            tracing::info!("Credential expired over cached data, asking for a choice");
            let _ = self.events.send(AuthEvent::ForcedChoiceRequired);
        }
    }

    /// True while the forced choice is raised and unanswered.
    pub fn choice_pending(&self) -> bool {
        self.current() == AuthState::TokenExpired && self.stored_choice().is_none()
    }

    pub fn stored_choice(&self) -> Option<ForcedChoice> {
        self.storage
            .get(session_keys::TOKEN_EXPIRATION_CHOICE)
            .as_deref()
            .and_then(ForcedChoice::parse)
    }

    /// Persist the user's answer so it survives a reload.
    pub fn record_choice(&self, choice: ForcedChoice) {
        if let Err(e) = self
            .storage
            .set(session_keys::TOKEN_EXPIRATION_CHOICE, choice.as_str())
        {
            tracing::warn!(error = %e, "Could not persist expiry choice");
        }
        diagnostics::emit(
            self.sink.as_ref(),
            Level::Info,
            Category::Auth,
            "expiry choice recorded",
            json!({ "choice": choice }),
        );
    }

    pub fn clear_choice(&self) {
        self.storage.remove(session_keys::TOKEN_EXPIRATION_CHOICE);
        self.choice_raised.store(false, Ordering::SeqCst);
    }

    pub fn on_auth_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(AuthState) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut map) = self.listeners.lock() {
            map.insert(id, Arc::new(listener));
        }
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn emit_event(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Token cancelled whenever an authenticated session is lost.
    pub fn operation_token(&self) -> CancellationToken {
        self.operations
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}
