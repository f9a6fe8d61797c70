// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use chrono::{DateTime, Duration, TimeZone, Utc};
use fieldops_sync::config::Config;
use fieldops_sync::db::{MemoryBackend, MemorySessionStorage};
use fieldops_sync::diagnostics::MemorySink;
use fieldops_sync::routes::create_router;
use fieldops_sync::services::{SyncBus, SyncFacade};
use fieldops_sync::time_utils::{format_utc_rfc3339, MockClock};
use fieldops_sync::AppState;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fixed "now" shared by every integration test.
#[allow(dead_code)]
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

/// Date string `days` away from `fixed_now()`.
#[allow(dead_code)]
pub fn days_from_now(days: i64) -> String {
    format_utc_rfc3339(fixed_now() + Duration::days(days))
}

/// A mock remote plus the shared pieces one "origin" would have.
///
/// Facades built from the same harness share the durable cache, session
/// storage, and sync bus, like browser tabs of one origin.
#[allow(dead_code)]
pub struct Harness {
    pub server: MockServer,
    pub backend: MemoryBackend,
    pub session: MemorySessionStorage,
    pub bus: SyncBus,
    pub clock: Arc<MockClock>,
    pub sink: Arc<MemorySink>,
}

#[allow(dead_code)]
impl Harness {
    pub async fn start() -> Self {
        let session = MemorySessionStorage::new();
        Self {
            server: MockServer::start().await,
            backend: MemoryBackend::new(),
            bus: SyncBus::new(Arc::new(session.clone())),
            session,
            clock: Arc::new(MockClock::new(fixed_now())),
            sink: Arc::new(MemorySink::new()),
        }
    }

    pub fn config(&self) -> Config {
        Config::for_api(&self.server.uri())
    }

    pub async fn facade(&self) -> Arc<SyncFacade> {
        self.facade_with(self.config()).await
    }

    pub async fn facade_with(&self, config: Config) -> Arc<SyncFacade> {
        SyncFacade::builder(config)
            .backend(Arc::new(self.backend.clone()))
            .session(Arc::new(self.session.clone()))
            .bus(self.bus.clone())
            .clock(self.clock.clone())
            .sink(self.sink.clone())
            .build()
            .await
            .expect("facade should build")
    }

    /// Install a credential valid for an hour.
    pub fn sign_in(&self, facade: &SyncFacade) {
        facade.credentials().set("test-token", "Bearer", Some(3600));
    }

    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub async fn requests_to(&self, endpoint: &str) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == endpoint)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Two sections, one term each, one "Camp" event each, empty attendance.
    pub async fn mount_two_section_camp(&self) {
        self.mount_two_section_event("Camp").await;
    }

    /// Same shape as `mount_two_section_camp`, but the event was renamed.
    pub async fn mount_two_section_camp_renamed(&self) {
        self.mount_two_section_event("Jamboree").await;
    }

    async fn mount_two_section_event(&self, name: &str) {
        Mock::given(method("GET"))
            .and(path("/sections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "A"},
                {"id": 2, "name": "B"}
            ])))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path("/terms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "1": [{"id": 10, "endDate": "2099-01-01"}],
                "2": [{"id": 20, "endDate": "2099-01-01"}]
            })))
            .mount(&self.server)
            .await;

        self.mount_events("1", json!([{"id": 100, "name": name, "startDate": days_from_now(3)}]))
            .await;
        self.mount_events("2", json!([{"id": 200, "name": name, "startDate": days_from_now(4)}]))
            .await;

        Mock::given(method("GET"))
            .and(path("/attendance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_events(&self, section: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("section", section))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_startup(&self) {
        Mock::given(method("GET"))
            .and(path("/startup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "globals": {"firstname": "Robin", "lastname": "Hale", "userid": 4242}
            })))
            .mount(&self.server)
            .await;
    }
}

/// A router over a facade built from `harness`.
#[allow(dead_code)]
pub async fn create_test_app(harness: &Harness) -> (axum::Router, Arc<AppState>) {
    let config = harness.config();
    let facade = harness.facade_with(config.clone()).await;
    let state = Arc::new(AppState { config, facade });
    (create_router(state.clone()), state)
}
