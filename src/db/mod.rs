//! Storage layer: durable cache backends, the typed store, and session storage.

pub mod backend;
pub mod session;
pub mod sqlite;
pub mod store;

pub use backend::{CacheBackend, MemoryBackend};
pub use session::{MemorySessionStorage, SessionStorage};
pub use sqlite::SqliteBackend;
pub use store::{PersistentStore, StoreCounts};

/// Bumped whenever the layout of a cached value changes.
pub const SCHEMA_VERSION: u32 = 2;

/// Prefix applied to every key in demo mode.
pub const DEMO_PREFIX: &str = "demo_";

/// Durable cache key names.
pub mod keys {
    pub const SECTIONS: &str = "sections_offline";
    pub const TERMS: &str = "terms_offline";
    pub const EVENTS_PREFIX: &str = "events_";
    pub const ATTENDANCE_PREFIX: &str = "attendance_";
    pub const MEMBERS_PREFIX: &str = "members_";
    pub const STARTUP_DATA: &str = "startup_data_offline";
    pub const LAST_SYNC: &str = "last_sync";
    pub const SCHEMA_VERSION: &str = "schema_version";

    pub fn events(section_id: &str) -> String {
        format!("{}{}", EVENTS_PREFIX, section_id)
    }

    pub fn attendance(event_id: &str) -> String {
        format!("{}{}", ATTENDANCE_PREFIX, event_id)
    }

    /// Members are cached per set of sections, keyed by the sorted ids.
    pub fn members(section_ids: &[String]) -> String {
        format!("{}{}", MEMBERS_PREFIX, sorted_id_set(section_ids).join(","))
    }

    pub fn sorted_id_set(section_ids: &[String]) -> Vec<String> {
        let mut ids: Vec<String> = section_ids.to_vec();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Credential-adjacent session storage key names.
pub mod session_keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const TOKEN_TYPE: &str = "token_type";
    pub const TOKEN_EXPIRES_AT: &str = "token_expires_at";
    /// Set when a credential expired or was rejected; cleared by logout
    pub const TOKEN_EXPIRED: &str = "token_expired";
    pub const TOKEN_INVALID: &str = "token_invalid";
    pub const OAUTH_RETURN_PATH: &str = "oauth_return_path";
    pub const TOKEN_EXPIRATION_CHOICE: &str = "token_expiration_choice";
    pub const AUTH_SYNC: &str = "auth_sync";
    pub const BLOCKED: &str = "osm_blocked";
}
