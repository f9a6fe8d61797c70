// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Deterministic demo data set.
//!
//! Seeded into the `demo_` key space so the dashboard has something to show
//! without ever talking to the remote.

use crate::db::PersistentStore;
use crate::models::{
    AttendanceEntry, AttendanceRecord, Event, Member, Section, StartupData, Term, TermsMap,
    UserIdentity,
};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

const SECTIONS: [(&str, &str, &str); 2] = [
    ("999901", "Demo Beavers", "beavers"),
    ("999902", "Demo Cubs", "cubs"),
];

const EVENTS: [(&str, &str, &str, i64); 5] = [
    ("9001", "999901", "Summer Camp", 5),
    ("9002", "999902", "Summer Camp", 5),
    ("9003", "999901", "Litter Pick", 2),
    ("9004", "999902", "Night Hike", 12),
    ("9005", "999902", "Archery", -3),
];

const MEMBERS: [(&str, &str, &str, &[&str]); 4] = [
    ("8001", "Alex", "Rivera", &["999901"]),
    ("8002", "Sam", "Okafor", &["999901", "999902"]),
    ("8003", "Jo", "Lindqvist", &["999902"]),
    ("8004", "Priya", "Shah", &["999902"]),
];

fn section(id: &str, name: &str, kind: &str) -> Section {
    Section {
        id: id.to_string(),
        name: name.to_string(),
        section_type: Some(kind.to_string()),
        metadata: Map::new(),
    }
}

fn passthrough(location: &str) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("location".to_string(), json!(location));
    extra
}

/// Sections, terms, events, attendance, members, and startup data
/// relative to `now`.
pub async fn seed(store: &PersistentStore, now: DateTime<Utc>) {
    let sections: Vec<Section> = SECTIONS
        .iter()
        .map(|(id, name, kind)| section(id, name, kind))
        .collect();

    let mut terms = TermsMap::new();
    for (id, _, _) in SECTIONS {
        terms.insert(
            id.to_string(),
            vec![Term {
                id: format!("{}-term", id),
                section_id: Some(id.to_string()),
                start_date: Some(format_utc_rfc3339(now - Duration::days(60))),
                end_date: Some(format_utc_rfc3339(now + Duration::days(60))),
            }],
        );
    }

    store.put_sections(&sections).await;
    store.put_terms(&terms).await;

    for (section_id, _, _) in SECTIONS {
        let events: Vec<Event> = EVENTS
            .iter()
            .filter(|(_, sid, _, _)| *sid == section_id)
            .map(|(id, sid, name, days)| Event {
                id: id.to_string(),
                section_id: sid.to_string(),
                term_id: Some(format!("{}-term", sid)),
                name: name.to_string(),
                start_date: format_utc_rfc3339(now + Duration::days(*days)),
                extra: passthrough("Demo Scout Hut"),
            })
            .collect();
        store.put_events(section_id, &events).await;

        for event in &events {
            let entries = MEMBERS
                .iter()
                .filter(|(_, _, _, member_sections)| member_sections.contains(&section_id))
                .enumerate()
                .map(|(i, (id, first, last, _))| AttendanceEntry {
                    member_id: id.to_string(),
                    first_name: Some(first.to_string()),
                    last_name: Some(last.to_string()),
                    status: Some(if i % 2 == 0 { "Yes" } else { "No" }.to_string()),
                    extra: Map::new(),
                })
                .collect();
            store
                .put_attendance(
                    &event.id,
                    &AttendanceRecord {
                        event_id: event.id.clone(),
                        member_entries: entries,
                    },
                )
                .await;
        }
    }

    let all_ids: Vec<String> = SECTIONS.iter().map(|(id, _, _)| id.to_string()).collect();
    let members: Vec<Member> = MEMBERS
        .iter()
        .map(|(id, first, last, member_sections)| Member {
            id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            section_ids: member_sections.iter().map(|s| s.to_string()).collect(),
            extra: Map::new(),
        })
        .collect();
    store.put_members(&all_ids, &members).await;

    store
        .put_startup_data(&StartupData {
            globals: UserIdentity {
                firstname: "Demo".to_string(),
                lastname: "Leader".to_string(),
                userid: "999999".to_string(),
                email: Some("demo@example.invalid".to_string()),
            },
            extra: Map::new(),
        })
        .await;

    store.set_last_sync(now).await;
    tracing::info!(sections = sections.len(), "Demo data seeded");
}
