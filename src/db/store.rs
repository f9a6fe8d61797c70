// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Typed cache operations over a durable backend.
//!
//! Provides wholesale, per-entity operations for:
//! - Sections and terms (replace-all)
//! - Events per section, attendance per event
//! - Members per set of sections
//! - Startup data and the last-sync marker
//!
//! Reads degrade to "empty" on failure and writes are logged rather than
//! propagated; the pipeline is idempotent so a lost write only costs a refetch.

use crate::db::backend::CacheBackend;
use crate::db::{keys, DEMO_PREFIX, SCHEMA_VERSION};
use crate::diagnostics::{self, Category, Level, SharedSink};
use crate::models::{AttendanceRecord, Event, Member, Section, StartupData, TermsMap};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Cache writes collected during a pipeline run and committed together.
#[derive(Debug, Clone, Default)]
pub struct CacheWrites {
    pub sections: Option<Vec<Section>>,
    pub terms: Option<TermsMap>,
    pub events: Vec<(String, Vec<Event>)>,
    pub attendance: Vec<(String, AttendanceRecord)>,
}

impl CacheWrites {
    pub fn is_empty(&self) -> bool {
        self.sections.is_none()
            && self.terms.is_none()
            && self.events.is_empty()
            && self.attendance.is_empty()
    }
}

/// Entry counts for status display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub sections: usize,
    pub event_scopes: usize,
    pub attendance_records: usize,
    pub member_sets: usize,
}

/// Typed persistent store.
pub struct PersistentStore {
    backend: Arc<dyn CacheBackend>,
    prefix: &'static str,
    sink: SharedSink,
}

impl PersistentStore {
    /// Open the store, clearing it when the stored schema version differs.
    pub async fn open(backend: Arc<dyn CacheBackend>, demo: bool, sink: SharedSink) -> Self {
        let store = Self {
            backend,
            prefix: if demo { DEMO_PREFIX } else { "" },
            sink,
        };
        store.check_schema().await;
        store
    }

    pub fn is_demo(&self) -> bool {
        !self.prefix.is_empty()
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn check_schema(&self) {
        let stored: Option<u32> = self.read(&self.key(keys::SCHEMA_VERSION)).await;
        if stored == Some(SCHEMA_VERSION) {
            return;
        }

        if let Some(old) = stored {
            tracing::warn!(
                backend = self.backend.name(),
                old,
                new = SCHEMA_VERSION,
                "Cache schema changed, clearing cached data"
            );
            diagnostics::emit(
                self.sink.as_ref(),
                Level::Warn,
                Category::Cache,
                "cache schema version mismatch, cleared",
                json!({ "old": old, "new": SCHEMA_VERSION }),
            );
        }
        self.clear_all().await;
        self.write(&self.key(keys::SCHEMA_VERSION), &SCHEMA_VERSION)
            .await;
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.report(Level::Warn, "cache read failed", key, &e.to_string());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(Level::Warn, "cache entry unreadable", key, &e.to_string());
                None
            }
        }
    }

    /// Returns whether the value was stored.
    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.report(Level::Error, "cache entry not serializable", key, &e.to_string());
                return false;
            }
        };
        match self.backend.put(key, raw).await {
            Ok(()) => true,
            Err(e) => {
                self.report(Level::Warn, "cache write failed", key, &e.to_string());
                false
            }
        }
    }

    async fn remove(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        if let Err(e) = self.backend.remove_many(&keys).await {
            self.report(Level::Warn, "cache removal failed", &keys.join(","), &e.to_string());
        }
    }

    fn report(&self, level: Level, message: &str, key: &str, error: &str) {
        tracing::warn!(key, error, "{}", message);
        diagnostics::emit(
            self.sink.as_ref(),
            level,
            Category::Cache,
            message,
            json!({ "key": key, "error": error }),
        );
    }

    // ─── Sections & Terms ────────────────────────────────────────

    pub async fn get_sections(&self) -> Vec<Section> {
        self.read(&self.key(keys::SECTIONS))
            .await
            .unwrap_or_default()
    }

    /// Replace all cached sections.
    pub async fn put_sections(&self, sections: &[Section]) -> bool {
        self.write(&self.key(keys::SECTIONS), sections).await
    }

    pub async fn has_offline_data(&self) -> bool {
        !self.get_sections().await.is_empty()
    }

    pub async fn get_terms(&self) -> TermsMap {
        self.read(&self.key(keys::TERMS)).await.unwrap_or_default()
    }

    pub async fn put_terms(&self, terms: &TermsMap) -> bool {
        self.write(&self.key(keys::TERMS), terms).await
    }

    // ─── Events & Attendance ─────────────────────────────────────

    pub async fn get_events(&self, section_id: &str) -> Vec<Event> {
        self.read(&self.key(&keys::events(section_id)))
            .await
            .unwrap_or_default()
    }

    /// Term the cached events of a section were fetched for.
    pub async fn get_term_for_events(&self, section_id: &str) -> Option<String> {
        self.get_events(section_id)
            .await
            .into_iter()
            .find_map(|e| e.term_id)
    }

    /// Replace the cached events of a section.
    ///
    /// Attendance for events that disappear from the scope is evicted with them.
    pub async fn put_events(&self, section_id: &str, events: &[Event]) -> bool {
        let previous = self.get_events(section_id).await;
        if !self.write(&self.key(&keys::events(section_id)), events).await {
            return false;
        }

        let kept: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        let evicted: Vec<String> = previous
            .iter()
            .filter(|e| !kept.contains(e.id.as_str()))
            .map(|e| self.key(&keys::attendance(&e.id)))
            .collect();
        if !evicted.is_empty() {
            tracing::debug!(section_id, count = evicted.len(), "Evicting stale attendance");
        }
        self.remove(evicted).await;
        true
    }

    pub async fn get_attendance(&self, event_id: &str) -> Option<AttendanceRecord> {
        self.read(&self.key(&keys::attendance(event_id))).await
    }

    pub async fn put_attendance(&self, event_id: &str, record: &AttendanceRecord) -> bool {
        self.write(&self.key(&keys::attendance(event_id)), record)
            .await
    }

    // ─── Members ─────────────────────────────────────────────────

    /// Members for a set of sections.
    ///
    /// An exact cached set wins. Otherwise members are unioned by id across
    /// every cached set that overlaps the request.
    pub async fn get_members(&self, section_ids: &[String]) -> Vec<Member> {
        if let Some(members) = self
            .read::<Vec<Member>>(&self.key(&keys::members(section_ids)))
            .await
        {
            return members;
        }

        let wanted: HashSet<&str> = section_ids.iter().map(String::as_str).collect();
        let prefix = self.key(keys::MEMBERS_PREFIX);
        let cached_keys = match self.backend.keys_with_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                self.report(Level::Warn, "cache scan failed", &prefix, &e.to_string());
                return Vec::new();
            }
        };

        let mut union: BTreeMap<String, Member> = BTreeMap::new();
        for key in cached_keys {
            let key_sections: Vec<&str> = key[prefix.len()..].split(',').collect();
            let Some(members) = self.read::<Vec<Member>>(&key).await else {
                continue;
            };
            for member in members {
                let belongs = if member.section_ids.is_empty() {
                    key_sections.iter().any(|s| wanted.contains(s))
                } else {
                    member.section_ids.iter().any(|s| wanted.contains(s.as_str()))
                };
                if belongs {
                    union.entry(member.id.clone()).or_insert(member);
                }
            }
        }
        union.into_values().collect()
    }

    pub async fn put_members(&self, section_ids: &[String], members: &[Member]) -> bool {
        self.write(&self.key(&keys::members(section_ids)), members)
            .await
    }

    // ─── Startup data & sync marker ──────────────────────────────

    pub async fn get_startup_data(&self) -> Option<StartupData> {
        self.read(&self.key(keys::STARTUP_DATA)).await
    }

    pub async fn put_startup_data(&self, data: &StartupData) -> bool {
        self.write(&self.key(keys::STARTUP_DATA), data).await
    }

    pub async fn get_last_sync(&self) -> Option<DateTime<Utc>> {
        self.read(&self.key(keys::LAST_SYNC)).await
    }

    /// Record a completed sync. Never moves the marker backwards.
    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(current) = self.get_last_sync().await {
            if current >= at {
                tracing::debug!(%current, attempted = %at, "Ignoring older last-sync marker");
                return current;
            }
        }
        self.write(&self.key(keys::LAST_SYNC), &at).await;
        at
    }

    // ─── Bulk ────────────────────────────────────────────────────

    /// Commit buffered pipeline writes in dependency order.
    pub async fn commit(&self, writes: CacheWrites) {
        if let Some(sections) = &writes.sections {
            self.put_sections(sections).await;
        }
        if let Some(terms) = &writes.terms {
            self.put_terms(terms).await;
        }
        for (section_id, events) in &writes.events {
            self.put_events(section_id, events).await;
        }
        for (event_id, record) in &writes.attendance {
            self.put_attendance(event_id, record).await;
        }
    }

    /// Remove every cached entry of this mode except the schema version.
    pub async fn clear_all(&self) {
        let schema_key = self.key(keys::SCHEMA_VERSION);
        let all = match self.backend.keys_with_prefix(self.prefix).await {
            Ok(all) => all,
            Err(e) => {
                self.report(Level::Error, "cache clear failed", self.prefix, &e.to_string());
                return;
            }
        };
        let doomed: Vec<String> = all
            .into_iter()
            .filter(|k| *k != schema_key)
            .filter(|k| self.is_demo() || !k.starts_with(DEMO_PREFIX))
            .collect();
        tracing::info!(count = doomed.len(), demo = self.is_demo(), "Clearing cache");
        self.remove(doomed).await;
    }

    pub async fn snapshot_counts(&self) -> StoreCounts {
        let count = |name: &'static str| {
            let prefix = self.key(name);
            async move {
                self.backend
                    .keys_with_prefix(&prefix)
                    .await
                    .map(|k| k.len())
                    .unwrap_or(0)
            }
        };
        StoreCounts {
            sections: self.get_sections().await.len(),
            event_scopes: count(keys::EVENTS_PREFIX).await,
            attendance_records: count(keys::ATTENDANCE_PREFIX).await,
            member_sets: count(keys::MEMBERS_PREFIX).await,
        }
    }
}
