// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Cache-first reads.
//!
//! Every read follows the same template:
//! 1. No usable credential: serve the cache, whatever it holds.
//! 2. Cache present and fresh: serve the cache.
//! 3. Otherwise fetch, write through, bump the last sync, and return the
//!    fresh data.
//! 4. Auth failure: flag the credential, keep the cache, serve it.
//! 5. Other failures: serve the cache if non-empty, else surface the error.

use crate::diagnostics::{self, Category, Level, SharedSink};
use crate::db::PersistentStore;
use crate::error::{Result, SyncError};
use crate::models::{AttendanceRecord, Credential, Event, Member, Section, StartupData, TermsMap};
use crate::services::api_client::ApiClient;
use crate::services::credentials::CredentialStore;
use crate::time_utils::{Clock, SharedClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Repository {
    store: Arc<PersistentStore>,
    api: Arc<ApiClient>,
    credentials: Arc<CredentialStore>,
    clock: SharedClock,
    sink: SharedSink,
    freshness: Duration,
}

impl Repository {
    pub fn new(
        store: Arc<PersistentStore>,
        api: Arc<ApiClient>,
        credentials: Arc<CredentialStore>,
        clock: SharedClock,
        sink: SharedSink,
        freshness: Duration,
    ) -> Self {
        Self {
            store,
            api,
            credentials,
            clock,
            sink,
            freshness,
        }
    }

    /// True when the last completed sync is younger than the freshness window.
    pub async fn is_fresh(&self) -> bool {
        let Some(last_sync) = self.store.get_last_sync().await else {
            return false;
        };
        let age = self.clock.now() - last_sync;
        age.to_std().map_or(true, |age| age < self.freshness)
    }

    /// The credential to fetch with, or `None` when the cache should be served.
    async fn fetch_credential(&self, has_cache: bool) -> Option<Credential> {
        // Demo data never leaves the cache
        if self.credentials.is_demo() {
            return None;
        }
        let credential = self.credentials.usable()?;
        if has_cache && self.is_fresh().await {
            return None;
        }
        Some(credential)
    }

    /// Record a completed write-through; freshness is judged from here.
    async fn mark_synced(&self) {
        self.store.set_last_sync(self.clock.now()).await;
    }

    fn fallback<T>(
        &self,
        entity: &'static str,
        error: SyncError,
        cached: T,
        empty: bool,
    ) -> Result<T> {
        match error {
            SyncError::Expired => Ok(cached),
            SyncError::AuthFailure => {
                self.credentials.mark_invalid();
                diagnostics::emit(
                    self.sink.as_ref(),
                    Level::Warn,
                    Category::Auth,
                    "credential rejected, serving cache",
                    json!({ "entity": entity }),
                );
                Ok(cached)
            }
            SyncError::Cancelled => Err(SyncError::Cancelled),
            e if e.is_recoverable() && !empty => {
                tracing::info!(entity, error = %e, "Serving cached data after fetch failure");
                Ok(cached)
            }
            e => Err(e),
        }
    }

    pub async fn get_sections(&self, cancel: &CancellationToken) -> Result<Vec<Section>> {
        let cached = self.store.get_sections().await;
        let Some(credential) = self.fetch_credential(!cached.is_empty()).await else {
            return Ok(cached);
        };

        match self.api.list_sections(&credential, cancel).await {
            Ok(fresh) => {
                self.store.put_sections(&fresh).await;
                self.mark_synced().await;
                Ok(fresh)
            }
            Err(e) => {
                let empty = cached.is_empty();
                self.fallback("sections", e, cached, empty)
            }
        }
    }

    pub async fn get_terms(&self, cancel: &CancellationToken) -> Result<TermsMap> {
        let cached = self.store.get_terms().await;
        let Some(credential) = self.fetch_credential(!cached.is_empty()).await else {
            return Ok(cached);
        };

        match self.api.list_terms(&credential, cancel).await {
            Ok(fresh) => {
                self.store.put_terms(&fresh).await;
                self.mark_synced().await;
                Ok(fresh)
            }
            Err(e) => {
                let empty = cached.is_empty();
                self.fallback("terms", e, cached, empty)
            }
        }
    }

    /// Events of a section in its most recent term.
    pub async fn get_events(
        &self,
        section_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>> {
        let cached = self.store.get_events(section_id).await;
        let Some(credential) = self.fetch_credential(!cached.is_empty()).await else {
            return Ok(cached);
        };

        let terms = match self.get_terms(cancel).await {
            Ok(terms) => terms,
            Err(e) => {
                let empty = cached.is_empty();
                return self.fallback("events", e, cached, empty);
            }
        };
        let Some(term) = ApiClient::most_recent_term(section_id, &terms, self.clock.now()) else {
            tracing::debug!(section_id, "No term for section, serving cached events");
            return Ok(cached);
        };

        match self
            .api
            .list_events(section_id, &term.id, &credential, cancel)
            .await
        {
            Ok(fresh) => {
                self.store.put_events(section_id, &fresh).await;
                self.mark_synced().await;
                Ok(fresh)
            }
            Err(e) => {
                let empty = cached.is_empty();
                self.fallback("events", e, cached, empty)
            }
        }
    }

    /// Attendance of one event; the term comes from the cached event when known.
    pub async fn get_attendance(
        &self,
        section_id: &str,
        event_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AttendanceRecord>> {
        let cached = self.store.get_attendance(event_id).await;
        let Some(credential) = self.fetch_credential(cached.is_some()).await else {
            return Ok(cached);
        };

        let term_id = match self.store.get_term_for_events(section_id).await {
            Some(term_id) => Some(term_id),
            None => {
                let terms = match self.get_terms(cancel).await {
                    Ok(terms) => terms,
                    Err(e) => {
                        let empty = cached.is_none();
                        return self.fallback("attendance", e, cached, empty);
                    }
                };
                ApiClient::most_recent_term(section_id, &terms, self.clock.now()).map(|t| t.id)
            }
        };
        let Some(term_id) = term_id else {
            return Ok(cached);
        };

        match self
            .api
            .get_attendance(section_id, event_id, &term_id, &credential, cancel)
            .await
        {
            Ok(Some(fresh)) => {
                // Attendance is only kept for events the cache knows about
                let known = self
                    .store
                    .get_events(section_id)
                    .await
                    .iter()
                    .any(|e| e.id == event_id);
                if known {
                    self.store.put_attendance(event_id, &fresh).await;
                    self.mark_synced().await;
                }
                Ok(Some(fresh))
            }
            Ok(None) => Ok(cached),
            Err(e) => {
                let empty = cached.is_none();
                self.fallback("attendance", e, cached, empty)
            }
        }
    }

    pub async fn get_members(
        &self,
        section_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Member>> {
        let cached = self.store.get_members(section_ids).await;
        let Some(credential) = self.fetch_credential(!cached.is_empty()).await else {
            return Ok(cached);
        };

        match self.api.list_members(section_ids, &credential, cancel).await {
            Ok(fresh) => {
                self.store.put_members(section_ids, &fresh).await;
                self.mark_synced().await;
                Ok(fresh)
            }
            Err(e) => {
                let empty = cached.is_empty();
                self.fallback("members", e, cached, empty)
            }
        }
    }

    pub async fn get_startup_data(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<StartupData>> {
        let cached = self.store.get_startup_data().await;
        let Some(credential) = self.fetch_credential(cached.is_some()).await else {
            return Ok(cached);
        };
        match self.refresh_startup_data(&credential, cancel).await {
            Ok(fresh) => {
                self.mark_synced().await;
                Ok(Some(fresh))
            }
            Err(e) => {
                let empty = cached.is_none();
                self.fallback("startup", e, cached, empty)
            }
        }
    }

    /// Fetch startup data unconditionally and cache it.
    pub async fn refresh_startup_data(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<StartupData> {
        let data = self.api.get_startup_data(credential, cancel).await?;
        self.store.put_startup_data(&data).await;
        tracing::info!(userid = %data.globals.userid, "Startup data refreshed");
        Ok(data)
    }
}
