use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion};
use fieldops_sync::models::{CardEvent, Event};
use fieldops_sync::services::pipeline::{build_cards, filter_window};
use fieldops_sync::time_utils::format_utc_rfc3339;
use serde_json::Map;
use std::hint::black_box;

const NAMES: [&str; 12] = [
    "Camp", "Hike", "Archery", "Litter Pick", "Swim", "Climbing", "Campfire", "Canoe",
    "First Aid", "Orienteering", "Cooking", "Night Walk",
];

/// A season's worth of events spread over 6 sections.
fn fixture() -> Vec<Event> {
    let base = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    (0..600)
        .map(|i| Event {
            id: (10_000 + i).to_string(),
            section_id: (i % 6).to_string(),
            term_id: Some("10".to_string()),
            name: NAMES[i % NAMES.len()].to_string(),
            start_date: format_utc_rfc3339(base + Duration::hours((i as i64 * 7) - 400)),
            extra: Map::new(),
        })
        .collect()
}

fn benchmark_pipeline(c: &mut Criterion) {
    let events = fixture();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
    let card_events: Vec<CardEvent> = events
        .iter()
        .cloned()
        .map(|event| CardEvent {
            section_name: format!("Section {}", event.section_id),
            event,
            attendance: None,
        })
        .collect();

    let mut group = c.benchmark_group("dashboard_pipeline");

    group.bench_function("filter_window", |b| {
        b.iter(|| {
            let paired: Vec<(Event, ())> = events.iter().cloned().map(|e| (e, ())).collect();
            filter_window(black_box(paired), now, Duration::days(7))
        })
    });

    group.bench_function("build_cards", |b| {
        b.iter(|| build_cards(black_box(card_events.clone())))
    });

    group.finish();
}

criterion_group!(benches, benchmark_pipeline);
criterion_main!(benches);
