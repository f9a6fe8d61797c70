// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dashboard pipeline.
//!
//! sections → terms → events per section → window filter → attendance per
//! event → group by name → sorted cards.
//!
//! Per-section and per-event work is serialized so the queue's pacing holds.
//! A failing section or attendance fetch is tolerated; an auth failure or a
//! cancellation aborts the run. Cache writes are collected in `CacheWrites`
//! and only committed by the caller once the run succeeds.

use crate::db::store::CacheWrites;
use crate::db::PersistentStore;
use crate::diagnostics::{self, Category, Level, SharedSink};
use crate::error::{Result, SyncError};
use crate::models::{CardEvent, Credential, Event, EventCard, Section, TermsMap};
use crate::services::api_client::ApiClient;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Counters describing one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub sections: usize,
    pub sections_failed: usize,
    pub events_seen: usize,
    pub events_in_window: usize,
    pub attendance_attached: usize,
    pub attendance_failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub cards: Vec<EventCard>,
    pub writes: CacheWrites,
    pub stats: PipelineStats,
}

pub struct DashboardPipeline {
    api: Arc<ApiClient>,
    store: Arc<PersistentStore>,
    sink: SharedSink,
    event_window: Duration,
}

impl DashboardPipeline {
    pub fn new(
        api: Arc<ApiClient>,
        store: Arc<PersistentStore>,
        sink: SharedSink,
        event_window_days: i64,
    ) -> Self {
        Self {
            api,
            store,
            sink,
            event_window: Duration::days(event_window_days),
        }
    }

    /// Build dashboard cards for `sections`.
    ///
    /// With a credential, data comes from the remote and the fetched
    /// snapshots are returned in `writes`. Without one, everything is read
    /// from the cache and `writes` stays empty.
    pub async fn run(
        &self,
        sections: &[Section],
        credential: Option<&Credential>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let mut output = PipelineOutput::default();
        output.stats.sections = sections.len();
        if sections.is_empty() {
            return Ok(output);
        }

        // Stage 1: one terms call for the whole run
        let terms = match credential {
            Some(cred) => self.prime_terms(cred, cancel, &mut output.writes).await?,
            None => TermsMap::new(),
        };

        // Stage 2: events per section
        let mut events: Vec<(Event, &str)> = Vec::new();
        for section in sections {
            check_cancelled(cancel)?;
            match self
                .section_events(section, credential, &terms, now, cancel, &mut output.writes)
                .await
            {
                Ok(section_events) => {
                    events.extend(section_events.into_iter().map(|e| (e, section.name.as_str())));
                }
                Err(e) if aborts_run(&e) => return Err(e),
                Err(e) => {
                    output.stats.sections_failed += 1;
                    tracing::warn!(section_id = %section.id, error = %e, "Skipping section");
                    diagnostics::emit(
                        self.sink.as_ref(),
                        Level::Warn,
                        Category::Sync,
                        "section events unavailable",
                        json!({ "sectionId": section.id, "error": e.to_string() }),
                    );
                }
            }
        }
        output.stats.events_seen = events.len();

        // Stage 3: time window
        let events = filter_window(events, now, self.event_window);
        output.stats.events_in_window = events.len();

        // Stage 4: attendance per event
        let mut card_events = Vec::with_capacity(events.len());
        for (event, section_name) in events {
            check_cancelled(cancel)?;
            let attendance = match credential {
                Some(cred) => match self.fetch_attendance(&event, cred, &terms, now, cancel).await {
                    Ok(Some(record)) => {
                        output
                            .writes
                            .attendance
                            .push((event.id.clone(), record.clone()));
                        Some(record)
                    }
                    Ok(None) => None,
                    Err(e) if aborts_run(&e) => return Err(e),
                    Err(e) => {
                        output.stats.attendance_failed += 1;
                        tracing::warn!(event_id = %event.id, error = %e, "Attendance unavailable");
                        None
                    }
                },
                None => self.store.get_attendance(&event.id).await,
            };
            if attendance.is_some() {
                output.stats.attendance_attached += 1;
            }
            card_events.push(CardEvent {
                event,
                section_name: section_name.to_string(),
                attendance,
            });
        }

        // Stages 5-7
        output.cards = build_cards(card_events);
        tracing::debug!(
            cards = output.cards.len(),
            online = credential.is_some(),
            "Pipeline run complete"
        );
        Ok(output)
    }

    async fn prime_terms(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
        writes: &mut CacheWrites,
    ) -> Result<TermsMap> {
        match self.api.list_terms(credential, cancel).await {
            Ok(terms) => {
                writes.terms = Some(terms.clone());
                Ok(terms)
            }
            Err(e) if aborts_run(&e) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Terms unavailable, using cached terms");
                Ok(self.store.get_terms().await)
            }
        }
    }

    async fn section_events(
        &self,
        section: &Section,
        credential: Option<&Credential>,
        terms: &TermsMap,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        writes: &mut CacheWrites,
    ) -> Result<Vec<Event>> {
        let Some(credential) = credential else {
            return Ok(self.store.get_events(&section.id).await);
        };

        let term = ApiClient::most_recent_term(&section.id, terms, now).ok_or_else(|| {
            SyncError::Protocol(format!("no term for section {}", section.id))
        })?;
        let events = self
            .api
            .list_events(&section.id, &term.id, credential, cancel)
            .await?;
        writes.events.push((section.id.clone(), events.clone()));
        Ok(events)
    }

    async fn fetch_attendance(
        &self,
        event: &Event,
        credential: &Credential,
        terms: &TermsMap,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<crate::models::AttendanceRecord>> {
        let term_id = match &event.term_id {
            Some(term_id) => term_id.clone(),
            None => match ApiClient::most_recent_term(&event.section_id, terms, now) {
                Some(term) => term.id,
                None => return Ok(None),
            },
        };
        self.api
            .get_attendance(&event.section_id, &event.id, &term_id, credential, cancel)
            .await
    }
}

fn aborts_run(error: &SyncError) -> bool {
    error.is_auth_failure() || matches!(error, SyncError::Cancelled)
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Keep events starting no earlier than `now - window`.
///
/// Events without a parseable start date cannot be placed on the dashboard
/// and are dropped.
pub fn filter_window<T>(
    events: Vec<(Event, T)>,
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<(Event, T)> {
    let cutoff = now - window;
    events
        .into_iter()
        .filter(|(event, _)| event.start().is_some_and(|start| start >= cutoff))
        .collect()
}

/// Group events by name into cards sorted by earliest date.
///
/// Within a card events are ordered by start date (then id). The card id is
/// the name joined with the id of its earliest event.
pub fn build_cards(events: Vec<CardEvent>) -> Vec<EventCard> {
    let mut buckets: BTreeMap<String, Vec<(DateTime<Utc>, CardEvent)>> = BTreeMap::new();
    for card_event in events {
        let Some(start) = card_event.event.start() else {
            continue;
        };
        buckets
            .entry(card_event.event.name.clone())
            .or_default()
            .push((start, card_event));
    }

    let mut cards: Vec<EventCard> = buckets
        .into_iter()
        .filter_map(|(name, mut bucket)| {
            bucket.sort_by(|(a_start, a), (b_start, b)| {
                a_start.cmp(b_start).then_with(|| a.event.id.cmp(&b.event.id))
            });
            let (earliest_date, first) = bucket.first()?;
            let earliest_date = *earliest_date;
            let id = format!("{}_{}", name, first.event.id);

            let mut sections: Vec<String> = Vec::new();
            for (_, e) in &bucket {
                if !sections.contains(&e.section_name) {
                    sections.push(e.section_name.clone());
                }
            }

            Some(EventCard {
                id,
                name,
                events: bucket.into_iter().map(|(_, e)| e).collect(),
                earliest_date,
                sections,
            })
        })
        .collect();

    cards.sort_by(|a, b| {
        a.earliest_date
            .cmp(&b.earliest_date)
            .then_with(|| a.name.cmp(&b.name))
    });
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::format_utc_rfc3339;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(id: &str, section_id: &str, name: &str, start: DateTime<Utc>) -> Event {
        Event {
            id: id.to_string(),
            section_id: section_id.to_string(),
            term_id: Some("10".to_string()),
            name: name.to_string(),
            start_date: format_utc_rfc3339(start),
            extra: Default::default(),
        }
    }

    fn card_event(event: Event, section_name: &str) -> CardEvent {
        CardEvent {
            event,
            section_name: section_name.to_string(),
            attendance: None,
        }
    }

    #[test]
    fn test_groups_same_name_across_sections() {
        let now = fixed_now();
        let cards = build_cards(vec![
            card_event(event("200", "2", "Camp", now + Duration::days(4)), "B"),
            card_event(event("100", "1", "Camp", now + Duration::days(3)), "A"),
            card_event(event("300", "1", "Hike", now + Duration::days(1)), "A"),
        ]);

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].name, "Hike");
        let camp = &cards[1];
        assert_eq!(camp.id, "Camp_100");
        let ids: Vec<&str> = camp.events.iter().map(|e| e.event.id.as_str()).collect();
        assert_eq!(ids, vec!["100", "200"]);
        assert_eq!(camp.sections, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(camp.earliest_date, camp.events[0].event.start().unwrap());
    }

    #[test]
    fn test_distinct_section_names() {
        let now = fixed_now();
        let cards = build_cards(vec![
            card_event(event("1", "1", "Meet", now), "A"),
            card_event(event("2", "1", "Meet", now + Duration::days(7)), "A"),
        ]);
        assert_eq!(cards[0].sections, vec!["A".to_string()]);
    }

    #[test]
    fn test_window_drops_old_and_undated_events() {
        let now = fixed_now();
        let mut undated = event("4", "1", "Undated", now);
        undated.start_date = String::new();
        let kept = filter_window(
            vec![
                (event("1", "1", "Old", now - Duration::days(8)), ()),
                (event("2", "1", "Edge", now - Duration::days(7)), ()),
                (event("3", "1", "Soon", now + Duration::days(1)), ()),
                (undated, ()),
            ],
            now,
            Duration::days(7),
        );
        let ids: Vec<&str> = kept.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn test_empty_input_builds_no_cards() {
        assert!(build_cards(Vec::new()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_window_never_keeps_old_events(offsets in proptest::collection::vec(-30i64..30, 0..40)) {
            let now = fixed_now();
            let events: Vec<(Event, ())> = offsets
                .iter()
                .enumerate()
                .map(|(i, d)| (event(&i.to_string(), "1", "E", now + Duration::days(*d)), ()))
                .collect();
            let cutoff = now - Duration::days(7);
            for (e, _) in filter_window(events, now, Duration::days(7)) {
                prop_assert!(e.start().unwrap() >= cutoff);
            }
        }

        #[test]
        fn prop_grouping_is_deterministic(
            specs in proptest::collection::vec((0usize..4, 0i64..20, 0usize..3), 0..30)
        ) {
            let now = fixed_now();
            let names = ["Camp", "Hike", "Meet", "Swim"];
            let sections = ["A", "B", "C"];
            let events: Vec<CardEvent> = specs
                .iter()
                .enumerate()
                .map(|(i, (n, d, s))| {
                    card_event(
                        event(&i.to_string(), &s.to_string(), names[*n], now + Duration::days(*d)),
                        sections[*s],
                    )
                })
                .collect();

            let mut reversed = events.clone();
            reversed.reverse();
            let first = build_cards(events);
            let second = build_cards(reversed);

            prop_assert_eq!(&first, &second);
            for pair in first.windows(2) {
                prop_assert!(pair[0].earliest_date <= pair[1].earliest_date);
            }
        }
    }
}
