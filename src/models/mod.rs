// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the sync core.

pub mod auth;
pub mod event;
pub mod member;
pub mod section;

pub use auth::{AuthState, Credential, StartupData, UserIdentity};
pub use event::{AttendanceEntry, AttendanceRecord, CardEvent, Event, EventCard};
pub use member::Member;
pub use section::{Section, Term, TermsMap};

use serde::{Deserialize, Deserializer};

/// The remote API is inconsistent about ids: some endpoints send numbers,
/// others strings. Everything is normalised to `String`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Str(String),
    Int(i64),
    Float(f64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Str(s) => s,
            RawId::Int(i) => i.to_string(),
            RawId::Float(f) if f.fract() == 0.0 => (f as i64).to_string(),
            RawId::Float(f) => f.to_string(),
        }
    }
}

pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_string)
}

pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?
        .map(RawId::into_string)
        .filter(|s| !s.is_empty()))
}

pub(crate) fn de_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RawId>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(RawId::into_string)
        .collect())
}
