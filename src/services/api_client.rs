// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity-management API client.
//!
//! Handles:
//! - Sections, startup data, terms, events, attendance, and members
//! - Routing every call through the paced request queue
//! - Auth-failure detection by status and by body shape
//! - Soft per-request timeouts

use crate::config::EndpointClass;
use crate::diagnostics::{self, Category, Level, SharedSink};
use crate::error::{Result, SyncError};
use crate::models::section::most_recent_term;
use crate::models::{
    AttendanceEntry, AttendanceRecord, Credential, Event, Member, Section, StartupData, Term,
    TermsMap,
};
use crate::services::breaker::{Breaker, ResponseVerdict};
use crate::services::queue::RequestQueue;
use crate::time_utils::{Clock, SharedClock};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Activity-management API client.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    queue: Arc<RequestQueue>,
    breaker: Arc<Breaker>,
    clock: SharedClock,
    sink: SharedSink,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        queue: Arc<RequestQueue>,
        breaker: Arc<Breaker>,
        clock: SharedClock,
        sink: SharedSink,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            queue,
            breaker,
            clock,
            sink,
            timeout,
        }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// List the sections visible to the user.
    pub async fn list_sections(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<Section>> {
        self.get_json(EndpointClass::Sections, "/sections", &[], credential, cancel)
            .await
    }

    /// Get the identity/globals payload.
    pub async fn get_startup_data(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<StartupData> {
        self.get_json(EndpointClass::Sections, "/startup", &[], credential, cancel)
            .await
    }

    /// Get every section's terms in one call.
    pub async fn list_terms(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<TermsMap> {
        let mut terms: TermsMap = self
            .get_json(EndpointClass::Sections, "/terms", &[], credential, cancel)
            .await?;
        for (section_id, section_terms) in terms.iter_mut() {
            for term in section_terms.iter_mut() {
                term.section_id = Some(section_id.clone());
            }
        }
        Ok(terms)
    }

    /// Most recent term of a section from an already-fetched terms map.
    pub fn most_recent_term(
        section_id: &str,
        terms: &TermsMap,
        now: DateTime<Utc>,
    ) -> Option<Term> {
        terms
            .get(section_id)
            .and_then(|t| most_recent_term(t, now))
            .cloned()
    }

    /// Most recent term of a section, fetching the terms map first.
    pub async fn resolve_term(
        &self,
        section_id: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Option<Term>> {
        let terms = self.list_terms(credential, cancel).await?;
        Ok(Self::most_recent_term(section_id, &terms, self.clock.now()))
    }

    /// List a section's events for a term, annotated with both ids.
    pub async fn list_events(
        &self,
        section_id: &str,
        term_id: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .get_json(
                EndpointClass::Events,
                "/events",
                &[("section", section_id), ("term", term_id)],
                credential,
                cancel,
            )
            .await?;
        for event in events.iter_mut() {
            event.section_id = section_id.to_string();
            event.term_id = Some(term_id.to_string());
        }
        Ok(events)
    }

    /// Attendance for one event. `None` when the remote has no register.
    pub async fn get_attendance(
        &self,
        section_id: &str,
        event_id: &str,
        term_id: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Option<AttendanceRecord>> {
        let body: Value = self
            .get_json(
                EndpointClass::Attendance,
                "/attendance",
                &[("section", section_id), ("event", event_id), ("term", term_id)],
                credential,
                cancel,
            )
            .await?;

        let mut record = match body {
            Value::Null => return Ok(None),
            // Some deployments send the bare entry list
            Value::Array(_) => AttendanceRecord {
                event_id: String::new(),
                member_entries: parse_value::<Vec<AttendanceEntry>>(body, "/attendance")?,
            },
            other => parse_value::<AttendanceRecord>(other, "/attendance")?,
        };
        record.event_id = event_id.to_string();
        Ok(Some(record))
    }

    /// Members belonging to any of the given sections.
    pub async fn list_members(
        &self,
        section_ids: &[String],
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        let sections = crate::db::keys::sorted_id_set(section_ids).join(",");
        self.get_json(
            EndpointClass::Members,
            "/members",
            &[("sections", sections.as_str())],
            credential,
            cancel,
        )
        .await
    }

    /// Generic GET through the queue with JSON response.
    async fn get_json<T: DeserializeOwned>(
        &self,
        class: EndpointClass,
        path: &str,
        query: &[(&str, &str)],
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<T> {
        if credential.invalid {
            return Err(SyncError::AuthFailure);
        }
        if credential.is_expired(self.clock.now()) {
            return Err(SyncError::Expired);
        }

        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .get(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", credential.token_type, credential.token),
            )
            .query(query);

        let result = self
            .queue
            .enqueue(class, cancel, || async move {
                // The deadline covers the body as well as the headers
                let exchange = async {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| SyncError::Transient(e.to_string()))?;
                    self.check_response_json(path, response).await
                };
                tokio::time::timeout(self.timeout, exchange)
                    .await
                    .map_err(|_| {
                        SyncError::Transient(format!(
                            "request timed out after {}ms",
                            self.timeout.as_millis()
                        ))
                    })?
            })
            .await;

        if let Err(e) = &result {
            self.report_failure(path, e);
        }
        result
    }

    /// Check response status, probe the body, and parse JSON.
    async fn check_response_json<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Transient(format!("reading body: {}", e)))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        let verdict = self.breaker.handle_response(status.as_u16(), body.as_ref());
        if verdict == ResponseVerdict::AuthFailure {
            return Err(SyncError::AuthFailure);
        }

        if status.as_u16() == 429 {
            tracing::warn!(endpoint = path, "API rate limit hit (429)");
            return Err(SyncError::Transient("rate limited".to_string()));
        }
        if status.is_server_error() {
            return Err(SyncError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SyncError::Protocol(format!("HTTP {}: {}", status, text)));
        }

        let body = body.ok_or_else(|| {
            SyncError::Protocol(format!("{} returned a non-JSON body", path))
        })?;
        parse_value(body, path)
    }

    fn report_failure(&self, path: &str, error: &SyncError) {
        let level = match error {
            SyncError::Cancelled => return,
            SyncError::AuthFailure | SyncError::Expired => Level::Warn,
            SyncError::Protocol(_) => Level::Error,
            _ => Level::Warn,
        };
        tracing::debug!(endpoint = path, error = %error, "API call failed");
        diagnostics::emit(
            self.sink.as_ref(),
            level,
            Category::Api,
            "api call failed",
            json!({ "endpoint": path, "kind": error.kind(), "error": error.to_string() }),
        );
    }
}

fn parse_value<T: DeserializeOwned>(body: Value, path: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| SyncError::Protocol(format!("{} JSON parse error: {}", path, e)))
}
