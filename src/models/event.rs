// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Events, attendance, and the derived dashboard cards.

use super::{de_id, de_opt_id};
use crate::time_utils::parse_api_date;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event scoped to a (section, term).
///
/// The same logical event shows up under different ids when sections
/// run it jointly; the dashboard groups those by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    /// Filled in by the API client from the request scope
    #[serde(default)]
    pub section_id: String,
    /// Filled in by the API client; `None` for events cached without one
    #[serde(default, deserialize_with = "de_opt_id")]
    pub term_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub start_date: String,
    /// Passthrough fields (location, times, cost, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        parse_api_date(&self.start_date)
    }
}

/// One member's line in an attendance register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
    #[serde(alias = "scoutid", deserialize_with = "de_id")]
    pub member_id: String,
    #[serde(default, alias = "firstname")]
    pub first_name: Option<String>,
    #[serde(default, alias = "lastname")]
    pub last_name: Option<String>,
    /// "Yes", "No", "Invited", ... as the API reports it
    #[serde(default, alias = "attending")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Attendance for exactly one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[serde(default)]
    pub event_id: String,
    #[serde(default, alias = "items")]
    pub member_entries: Vec<AttendanceEntry>,
}

impl AttendanceRecord {
    /// Entries whose status reads as attending.
    pub fn attending_count(&self) -> usize {
        self.member_entries
            .iter()
            .filter(|e| {
                e.status
                    .as_deref()
                    .is_some_and(|s| s.eq_ignore_ascii_case("yes"))
            })
            .count()
    }
}

/// An event as it appears on a dashboard card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEvent {
    #[serde(flatten)]
    pub event: Event,
    pub section_name: String,
    /// `None` when attendance was never fetched or the fetch failed
    pub attendance: Option<AttendanceRecord>,
}

/// Events grouped by name for one dashboard card. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCard {
    /// `name` joined with the id of the earliest event
    pub id: String,
    pub name: String,
    pub events: Vec<CardEvent>,
    pub earliest_date: DateTime<Utc>,
    /// Distinct section names, in event order
    pub sections: Vec<String>,
}
