// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The surface the UI talks to.
//!
//! `SyncFacade` owns one instance of every service (credential store,
//! breaker, queue, API client, repository, pipeline, auth machine) and
//! exposes the dashboard, members, sync, and auth operations. Recoverable
//! failures never escape the read paths: they degrade to cached data. Only
//! `sync_all` reports failures to the caller.

use crate::config::Config;
use crate::db::session_keys;
use crate::db::{
    CacheBackend, MemorySessionStorage, PersistentStore, SessionStorage, SqliteBackend,
};
use crate::diagnostics::{self, Category, Level, SharedSink, TracingSink};
use crate::error::{Result, SyncError};
use crate::models::{
    AttendanceRecord, AuthState, Credential, Event, EventCard, Member, UserIdentity,
};
use crate::services::api_client::ApiClient;
use crate::services::auth_machine::{AuthEvent, AuthMachine, ForcedChoice, Subscription};
use crate::services::breaker::Breaker;
use crate::services::credentials::CredentialStore;
use crate::services::demo;
use crate::services::pipeline::{DashboardPipeline, PipelineStats};
use crate::services::queue::{QueueStats, RequestQueue};
use crate::services::repository::Repository;
use crate::services::sync_bus::{OriginId, SyncBus};
use crate::time_utils::{Clock, SharedClock, SystemClock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Dashboard payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub cards: Vec<EventCard>,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Outcome of a completed full sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub sections: usize,
    pub cards: Vec<EventCard>,
    pub stats: PipelineStats,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Result of parsing the OAuth redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct OAuthCompletion {
    /// Callback URL with the token parameters removed
    pub cleaned_url: String,
    pub return_path: String,
    pub auth_state: AuthState,
}

/// Assembles a `SyncFacade`. Anything not supplied gets a production default.
pub struct FacadeBuilder {
    config: Config,
    backend: Option<Arc<dyn CacheBackend>>,
    session: Option<Arc<dyn SessionStorage>>,
    bus: Option<SyncBus>,
    clock: Option<SharedClock>,
    sink: Option<SharedSink>,
}

impl FacadeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            backend: None,
            session: None,
            bus: None,
            clock: None,
            sink: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Contexts sharing a session storage and a bus behave like tabs of one origin.
    pub fn session(mut self, session: Arc<dyn SessionStorage>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn bus(mut self, bus: SyncBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<Arc<SyncFacade>> {
        let config = self.config;
        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sink: SharedSink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let session: Arc<dyn SessionStorage> = self
            .session
            .unwrap_or_else(|| Arc::new(MemorySessionStorage::new()));
        let bus = self.bus.unwrap_or_else(|| SyncBus::new(session.clone()));
        let backend: Arc<dyn CacheBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(SqliteBackend::open(&config.cache_path)?),
        };

        let store =
            Arc::new(PersistentStore::open(backend, config.demo_mode, sink.clone()).await);
        if config.demo_mode && !store.has_offline_data().await {
            demo::seed(&store, clock.now()).await;
        }

        let origin = OriginId::next();
        let breaker = Arc::new(Breaker::new(session.clone()));
        let credentials = Arc::new(CredentialStore::new(
            session.clone(),
            config.demo_mode,
            clock.clone(),
            breaker.clone(),
            bus.clone(),
            origin,
            config.default_token_lifetime(),
        ));

        // The breaker only ever sees a callback, never the machine
        {
            let credentials = Arc::downgrade(&credentials);
            let sink = sink.clone();
            breaker.on_auth_error(Box::new(move || {
                if let Some(credentials) = credentials.upgrade() {
                    credentials.mark_invalid();
                }
                diagnostics::emit(
                    sink.as_ref(),
                    Level::Warn,
                    Category::Auth,
                    "breaker tripped on authorization failure",
                    json!({}),
                );
            }));
        }

        let queue = Arc::new(RequestQueue::new(
            config.pacing(),
            config.max_parallel_requests,
            breaker.clone(),
        ));
        let api = Arc::new(ApiClient::new(
            &config.api_base_url,
            config.request_timeout,
            queue.clone(),
            breaker.clone(),
            clock.clone(),
            sink.clone(),
        ));
        let repository = Repository::new(
            store.clone(),
            api.clone(),
            credentials.clone(),
            clock.clone(),
            sink.clone(),
            config.freshness_window,
        );
        let pipeline = DashboardPipeline::new(
            api.clone(),
            store.clone(),
            sink.clone(),
            config.event_window_days,
        );
        let machine = Arc::new(AuthMachine::new(
            credentials.clone(),
            store.clone(),
            session.clone(),
            clock.clone(),
            sink.clone(),
        ));
        let (refresh_tx, _) = watch::channel(false);

        let facade = Arc::new(SyncFacade {
            config,
            clock,
            sink,
            session,
            bus,
            origin,
            store,
            breaker,
            credentials,
            queue,
            api,
            repository,
            pipeline,
            machine,
            sync_lock: Mutex::new(()),
            refresh_running: refresh_tx,
        });

        let state = facade.machine.evaluate("mount").await;
        tracing::info!(
            %state,
            demo = facade.config.demo_mode,
            origin = ?facade.origin,
            "Sync facade ready"
        );
        Ok(facade)
    }
}

pub struct SyncFacade {
    config: Config,
    clock: SharedClock,
    sink: SharedSink,
    session: Arc<dyn SessionStorage>,
    bus: SyncBus,
    origin: OriginId,
    store: Arc<PersistentStore>,
    breaker: Arc<Breaker>,
    credentials: Arc<CredentialStore>,
    queue: Arc<RequestQueue>,
    api: Arc<ApiClient>,
    repository: Repository,
    pipeline: DashboardPipeline,
    machine: Arc<AuthMachine>,
    /// Full syncs never overlap
    sync_lock: Mutex<()>,
    /// True while a background refresh is in flight
    refresh_running: watch::Sender<bool>,
}

impl SyncFacade {
    pub fn builder(config: Config) -> FacadeBuilder {
        FacadeBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn breaker(&self) -> &Arc<Breaker> {
        &self.breaker
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    // ---- dashboard ----

    pub async fn get_dashboard(self: &Arc<Self>) -> Result<Dashboard> {
        self.get_dashboard_with_cancel(&CancellationToken::new())
            .await
    }

    /// Cards for the dashboard plus the time of the last completed sync.
    ///
    /// An empty cache with a usable credential syncs in the foreground. A
    /// stale cache is served at once while a refresh runs in the background.
    /// Without a usable credential the cache is all there is.
    pub async fn get_dashboard_with_cancel(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Dashboard> {
        let state = self.machine.evaluate("dashboard").await;
        tracing::debug!(%state, "Dashboard requested");
        let (cancel, _guard) = self.link(cancel);

        if self.config.demo_mode {
            return self.cached_dashboard(&cancel).await;
        }
        let Some(credential) = self.credentials.usable() else {
            return self.cached_dashboard(&cancel).await;
        };

        if !self.store.has_offline_data().await {
            return match self.run_sync(&credential, &cancel).await {
                Ok(report) => Ok(Dashboard {
                    cards: report.cards,
                    last_sync: report.last_sync,
                }),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Foreground sync failed, rendering offline");
                    self.cached_dashboard(&cancel).await
                }
                Err(e) => Err(e),
            };
        }

        if !self.repository.is_fresh().await {
            self.schedule_background_refresh();
        }
        self.cached_dashboard(&cancel).await
    }

    /// Run the pipeline against the cache only.
    async fn cached_dashboard(&self, cancel: &CancellationToken) -> Result<Dashboard> {
        let sections = self.store.get_sections().await;
        let output = self
            .pipeline
            .run(&sections, None, self.clock.now(), cancel)
            .await?;
        Ok(Dashboard {
            cards: output.cards,
            last_sync: self.store.get_last_sync().await,
        })
    }

    /// Start a background refresh unless one is already running.
    pub fn schedule_background_refresh(self: &Arc<Self>) -> bool {
        let started = self.refresh_running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !started {
            tracing::debug!("Background refresh already running");
            return false;
        }

        let facade = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = facade.machine.operation_token();
            let outcome = match facade.credentials.usable() {
                Some(credential) => facade.run_sync(&credential, &cancel).await.map(|_| ()),
                None => Err(SyncError::NotAuthenticated),
            };
            match outcome {
                Ok(()) => diagnostics::emit(
                    facade.sink.as_ref(),
                    Level::Info,
                    Category::Sync,
                    "background refresh complete",
                    json!({}),
                ),
                Err(e) => diagnostics::emit(
                    facade.sink.as_ref(),
                    Level::Warn,
                    Category::Sync,
                    "background refresh failed",
                    json!({ "kind": e.kind(), "error": e.to_string() }),
                ),
            }
            facade.refresh_running.send_replace(false);
        });
        true
    }

    /// Resolves once no background refresh is running.
    pub async fn wait_for_background_refresh(&self) {
        let mut running = self.refresh_running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Full sync: sections, then the pipeline, then commit and bump `last_sync`.
    async fn run_sync(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let _running = self.sync_lock.lock().await;
        let now = self.clock.now();

        let result = async {
            let sections = self.api.list_sections(credential, cancel).await?;
            self.store.put_sections(&sections).await;
            let output = self
                .pipeline
                .run(&sections, Some(credential), now, cancel)
                .await?;
            Ok::<_, SyncError>((sections.len(), output))
        }
        .await;

        match result {
            Ok((sections, output)) => {
                self.store.commit(output.writes).await;
                let last_sync = self.store.set_last_sync(now).await;
                tracing::info!(sections, cards = output.cards.len(), "Sync complete");
                diagnostics::emit(
                    self.sink.as_ref(),
                    Level::Info,
                    Category::Sync,
                    "sync complete",
                    json!({ "sections": sections, "stats": output.stats }),
                );
                Ok(SyncReport {
                    sections,
                    cards: output.cards,
                    stats: output.stats,
                    last_sync: Some(last_sync),
                })
            }
            Err(e) => {
                if matches!(e, SyncError::AuthFailure) {
                    self.credentials.mark_invalid();
                }
                if e.is_auth_failure() {
                    self.machine.evaluate("auth failure").await;
                }
                if !matches!(e, SyncError::Cancelled) {
                    diagnostics::emit(
                        self.sink.as_ref(),
                        Level::Warn,
                        Category::Sync,
                        "sync failed",
                        json!({ "kind": e.kind(), "error": e.to_string() }),
                    );
                }
                Err(e)
            }
        }
    }

    // ---- explicit sync ----

    pub async fn sync_all(self: &Arc<Self>) -> Result<SyncReport> {
        self.sync_all_with_cancel(&CancellationToken::new()).await
    }

    /// User-initiated refresh. Unlike the read paths, failures are returned.
    pub async fn sync_all_with_cancel(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let (cancel, _guard) = self.link(cancel);
        let now = self.clock.now();

        if self.config.demo_mode {
            demo::seed(&self.store, now).await;
            let dashboard = self.cached_dashboard(&cancel).await?;
            return Ok(SyncReport {
                sections: self.store.get_sections().await.len(),
                cards: dashboard.cards,
                stats: PipelineStats::default(),
                last_sync: dashboard.last_sync,
            });
        }

        let Some(credential) = self.credentials.get() else {
            return Err(SyncError::NotAuthenticated);
        };
        if credential.invalid {
            self.machine.evaluate("sync").await;
            return Err(SyncError::AuthFailure);
        }
        if credential.is_expired(now) {
            self.machine.evaluate("sync").await;
            return Err(SyncError::Expired);
        }

        let report = self.run_sync(&credential, &cancel).await?;
        self.machine.evaluate("sync").await;
        Ok(report)
    }

    // ---- per-entity reads ----

    pub async fn get_members_for_sections(
        self: &Arc<Self>,
        section_ids: &[String],
    ) -> Result<Vec<Member>> {
        self.get_members_for_sections_with_cancel(section_ids, &CancellationToken::new())
            .await
    }

    /// Cache-first member lookup. A miss with no way to fetch asks the UI to log in.
    pub async fn get_members_for_sections_with_cancel(
        self: &Arc<Self>,
        section_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        let (cancel, _guard) = self.link(cancel);
        let members = self
            .recover("members", self.repository.get_members(section_ids, &cancel).await)?
            .unwrap_or_default();

        if !self.credentials.is_usable() {
            self.machine.evaluate("members").await;
            if members.is_empty() {
                tracing::info!(?section_ids, "Members not cached and no credential");
                self.machine.emit_event(AuthEvent::LoginRequired {
                    login_url: self.login_url(),
                });
            }
        }
        Ok(members)
    }

    pub async fn get_events_for_section(
        self: &Arc<Self>,
        section_id: &str,
    ) -> Result<Vec<Event>> {
        let (cancel, _guard) = self.link(&CancellationToken::new());
        Ok(self
            .recover("events", self.repository.get_events(section_id, &cancel).await)?
            .unwrap_or_default())
    }

    pub async fn get_attendance_for_event(
        self: &Arc<Self>,
        section_id: &str,
        event_id: &str,
    ) -> Result<Option<AttendanceRecord>> {
        let (cancel, _guard) = self.link(&CancellationToken::new());
        Ok(self
            .recover(
                "attendance",
                self.repository
                    .get_attendance(section_id, event_id, &cancel)
                    .await,
            )?
            .flatten())
    }

    /// Turn recoverable failures into "nothing to show".
    fn recover<T>(&self, entity: &'static str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_recoverable() => {
                diagnostics::emit(
                    self.sink.as_ref(),
                    Level::Warn,
                    Category::Cache,
                    "read failed with empty cache",
                    json!({ "entity": entity, "kind": e.kind(), "error": e.to_string() }),
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn user_identity(&self) -> Option<UserIdentity> {
        self.store.get_startup_data().await.map(|data| data.globals)
    }

    // ---- auth ----

    /// Re-evaluate and return the auth state.
    pub async fn get_auth_state(&self) -> AuthState {
        self.machine.evaluate("query").await
    }

    /// Last evaluated state, without touching storage.
    pub fn current_auth_state(&self) -> AuthState {
        self.machine.current()
    }

    pub fn choice_pending(&self) -> bool {
        self.machine.choice_pending()
    }

    pub fn on_auth_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(AuthState) + Send + Sync + 'static,
    {
        self.machine.on_auth_state_change(listener)
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.machine.subscribe_events()
    }

    /// OAuth redirect URL for the configured backend and frontend.
    pub fn login_url(&self) -> String {
        format!(
            "{}/oauth/login?state={}&frontend_url={}",
            self.config.backend_base_url.trim_end_matches('/'),
            self.config.oauth_state(),
            urlencoding::encode(&self.config.frontend_url)
        )
    }

    /// Remember where to come back to and return the OAuth redirect URL.
    pub fn login(&self, return_path: Option<&str>) -> String {
        let return_path = match return_path {
            Some(path) if is_local_path(path) => path,
            Some(path) => {
                tracing::warn!(return_path = path, "Ignoring non-local OAuth return path");
                "/"
            }
            None => "/",
        };
        if let Err(e) = self.session.set(session_keys::OAUTH_RETURN_PATH, return_path) {
            tracing::warn!(error = %e, "Could not store OAuth return path");
        }
        let url = self.login_url();
        tracing::info!(return_path, "Starting OAuth login");
        url
    }

    /// Answer the forced choice. `Relogin` returns the redirect URL.
    pub fn resolve_forced_choice(
        &self,
        choice: ForcedChoice,
        return_path: Option<&str>,
    ) -> Option<String> {
        self.machine.record_choice(choice);
        match choice {
            ForcedChoice::Relogin => Some(self.login(return_path)),
            ForcedChoice::StayOffline => None,
        }
    }

    /// Drop the credential and all cached data.
    pub async fn logout(&self) -> AuthState {
        self.credentials.clear();
        self.session.remove(session_keys::TOKEN_EXPIRED);
        self.session.remove(session_keys::OAUTH_RETURN_PATH);
        self.machine.clear_choice();
        self.store.clear_all().await;
        diagnostics::emit(
            self.sink.as_ref(),
            Level::Info,
            Category::Auth,
            "logged out",
            json!({}),
        );
        self.machine.evaluate("logout").await
    }

    /// Parse the OAuth redirect, install the credential, and load data.
    pub async fn complete_oauth_callback(&self, url: &str) -> Result<OAuthCompletion> {
        let mut parsed = reqwest::Url::parse(url)
            .map_err(|e| SyncError::Protocol(format!("invalid callback URL: {}", e)))?;

        let mut token = None;
        let mut token_type = None;
        let mut expires_in = None;
        let mut kept: Vec<(String, String)> = Vec::new();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "access_token" => token = Some(value.into_owned()),
                "token_type" => token_type = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse::<i64>().ok(),
                _ => kept.push((key.into_owned(), value.into_owned())),
            }
        }
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SyncError::Protocol("callback without access_token".to_string()))?;

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept.iter());
        }

        let credential = self.credentials.set(
            &token,
            token_type.as_deref().unwrap_or("Bearer"),
            expires_in,
        );
        self.machine.clear_choice();
        self.machine.evaluate("oauth callback").await;

        let return_path = self
            .session
            .get(session_keys::OAUTH_RETURN_PATH)
            .filter(|path| is_local_path(path))
            .unwrap_or_else(|| "/".to_string());
        self.session.remove(session_keys::OAUTH_RETURN_PATH);

        self.post_auth_load(&credential).await;

        Ok(OAuthCompletion {
            cleaned_url: parsed.to_string(),
            return_path,
            auth_state: self.machine.current(),
        })
    }

    async fn post_auth_load(&self, credential: &Credential) {
        if self.config.demo_mode {
            return;
        }
        let cancel = self.machine.operation_token();
        if let Err(e) = self.repository.refresh_startup_data(credential, &cancel).await {
            tracing::warn!(error = %e, "Post-auth startup data load failed");
        }
        if let Err(e) = self.run_sync(credential, &cancel).await {
            tracing::warn!(error = %e, "Post-auth sync failed");
        }
        self.machine.evaluate("post-auth load").await;
    }

    // ---- status ----

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn queue_stats_watch(&self) -> watch::Receiver<QueueStats> {
        self.queue.subscribe_stats()
    }

    /// Start the watchdog, the cross-context listener, and the stats publisher.
    pub fn spawn_background_tasks(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let watchdog = {
            let facade = Arc::clone(self);
            let cancel = cancel.clone();
            let period = self.config.watchdog_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            facade.machine.evaluate("watchdog").await;
                        }
                    }
                }
                tracing::debug!("Watchdog stopped");
            })
        };

        let listener = {
            let facade = Arc::clone(self);
            let cancel = cancel.clone();
            let mut messages = self.bus.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        message = messages.recv() => match message {
                            Ok(message) if message.origin == facade.origin => {}
                            Ok(message) => {
                                tracing::debug!(signal = message.signal.as_str(), "Credential changed elsewhere");
                                facade.machine.evaluate("cross-context").await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::debug!(skipped, "Sync bus lagged");
                                facade.machine.evaluate("cross-context").await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                tracing::debug!("Sync bus listener stopped");
            })
        };

        let stats = self
            .queue
            .spawn_stats_publisher(Duration::from_secs(1), cancel);

        vec![watchdog, listener, stats]
    }

    /// A token cancelled by the caller or by loss of the authenticated session.
    fn link(&self, caller: &CancellationToken) -> (CancellationToken, DropGuard) {
        let linked = caller.child_token();
        let session = self.machine.operation_token();
        let watcher = linked.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = session.cancelled() => watcher.cancel(),
                _ = watcher.cancelled() => {}
            }
        });
        (linked.clone(), linked.drop_guard())
    }
}

/// A same-origin absolute path. Anything that could make the frontend URL
/// prefix point elsewhere (`//host`, `@host`, backslashes) is rejected.
fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('@')
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
}
