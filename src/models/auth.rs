// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Credential, auth state, and user identity models.

use super::de_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Bearer credential issued by the OAuth backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    /// Set when the remote rejected the token before it timed out
    pub invalid: bool,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Not timed out and not rejected.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.invalid && !self.is_expired(now)
    }
}

/// Where the client stands with respect to credentials and cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum AuthState {
    /// No credential and nothing cached
    NoData,
    /// Cached data, never authenticated this session
    CachedOnly,
    /// Cached data, credential timed out or rejected
    TokenExpired,
    Authenticated,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::NoData => "no_data",
            AuthState::CachedOnly => "cached_only",
            AuthState::TokenExpired => "token_expired",
            AuthState::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The logged-in user, from the startup payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(deserialize_with = "de_id")]
    pub userid: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Startup payload, fetched once per session after login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupData {
    pub globals: UserIdentity,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credential_usability() {
        let now = Utc::now();
        let mut cred = Credential {
            token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: now + Duration::minutes(10),
            invalid: false,
        };
        assert!(cred.is_usable(now));
        assert!(!cred.is_expired(now));

        cred.invalid = true;
        assert!(!cred.is_usable(now));
        assert!(!cred.is_expired(now));

        cred.invalid = false;
        assert!(cred.is_expired(now + Duration::minutes(10)));
    }

    #[test]
    fn test_auth_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuthState::TokenExpired).unwrap(),
            "\"token_expired\""
        );
        assert_eq!(AuthState::CachedOnly.to_string(), "cached_only");
    }

    #[test]
    fn test_startup_data_parses_globals() {
        let data: StartupData = serde_json::from_str(
            r#"{"globals": {"firstname": "Sam", "lastname": "Lee", "userid": 99, "email": "s@x.test"}, "roles": []}"#,
        )
        .unwrap();
        assert_eq!(data.globals.userid, "99");
        assert_eq!(data.globals.email.as_deref(), Some("s@x.test"));
        assert!(data.extra.contains_key("roles"));
    }
}
