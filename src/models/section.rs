// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Sections and terms.

use super::{de_id, de_opt_id};
use crate::time_utils::parse_api_date;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An organizational unit (age group, weekday cohort) owning events and members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub name: String,
    /// Section type as reported by the API (e.g. "cubs", "waiting")
    #[serde(rename = "type", default)]
    pub section_type: Option<String>,
    /// Anything else the API sent
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A time span within a section; events are scoped to (section, term).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    /// Filled from the map key when parsed from `/terms`
    #[serde(default, deserialize_with = "de_opt_id")]
    pub section_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl Term {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start_date.as_deref().and_then(parse_api_date)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end_date.as_deref().and_then(parse_api_date)
    }

    /// True when `now` lies inside the term. A missing start is open-ended.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let started = self.start().map_or(true, |s| s <= now);
        let not_ended = self.end().is_some_and(|e| now <= e);
        started && not_ended
    }
}

/// Terms keyed by section id, as returned by `/terms`.
pub type TermsMap = HashMap<String, Vec<Term>>;

/// Pick the term the pipeline should use for a section.
///
/// The current term (one containing `now`) wins; failing that, the term with
/// the latest end date. Terms without a parseable end date are ignored.
pub fn most_recent_term(terms: &[Term], now: DateTime<Utc>) -> Option<&Term> {
    let dated = terms.iter().filter(|t| t.end().is_some());

    dated
        .clone()
        .filter(|t| t.contains(now))
        .max_by_key(|t| t.end())
        .or_else(|| dated.max_by_key(|t| t.end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn term(id: &str, start: Option<&str>, end: &str) -> Term {
        Term {
            id: id.to_string(),
            section_id: Some("1".to_string()),
            start_date: start.map(String::from),
            end_date: Some(end.to_string()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_current_term_preferred_over_later_term() {
        let terms = vec![
            term("10", Some("2026-01-01"), "2026-07-31"),
            term("11", Some("2026-09-01"), "2026-12-20"),
        ];
        assert_eq!(most_recent_term(&terms, now()).unwrap().id, "10");
    }

    #[test]
    fn test_falls_back_to_latest_end_date() {
        let terms = vec![
            term("8", Some("2025-01-01"), "2025-04-01"),
            term("9", Some("2025-09-01"), "2025-12-20"),
        ];
        assert_eq!(most_recent_term(&terms, now()).unwrap().id, "9");
    }

    #[test]
    fn test_missing_start_is_open_ended() {
        let terms = vec![term("10", None, "2099-01-01")];
        assert_eq!(most_recent_term(&terms, now()).unwrap().id, "10");
    }

    #[test]
    fn test_no_terms() {
        assert!(most_recent_term(&[], now()).is_none());
    }

    #[test]
    fn test_section_deserializes_numeric_id_and_keeps_metadata() {
        let section: Section = serde_json::from_str(
            r#"{"id": 42, "name": "Beavers", "type": "beavers", "colour": "blue"}"#,
        )
        .unwrap();
        assert_eq!(section.id, "42");
        assert_eq!(section.section_type.as_deref(), Some("beavers"));
        assert_eq!(section.metadata["colour"], "blue");
    }
}
