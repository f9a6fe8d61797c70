//! Configuration loaded from environment variables.
//!
//! Loaded once at startup. Every tunable constant of the sync core
//! (freshness window, pacing, timeouts, watchdog period) lives here.

use std::env;
use std::time::Duration;

/// Default look-back window for dashboard events.
pub const DEFAULT_EVENT_WINDOW_DAYS: i64 = 7;

/// Default age after which cached data is refreshed (30 minutes).
pub const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 30 * 60;

/// Lifetime assumed for a credential when the server omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// Endpoint groups that share one in-flight slot and one pacing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Sections, startup data, and terms.
    Sections,
    Events,
    Attendance,
    Members,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 4] = [
        EndpointClass::Sections,
        EndpointClass::Events,
        EndpointClass::Attendance,
        EndpointClass::Members,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Sections => "sections",
            EndpointClass::Events => "events",
            EndpointClass::Attendance => "attendance",
            EndpointClass::Members => "members",
        }
    }
}

/// Delay inserted between consecutive calls of the same endpoint class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingProfile {
    pub sections: Duration,
    pub events: Duration,
    pub attendance: Duration,
    pub members: Duration,
}

impl PacingProfile {
    pub fn normal() -> Self {
        Self {
            sections: Duration::from_millis(300),
            events: Duration::from_millis(500),
            attendance: Duration::from_millis(800),
            members: Duration::from_millis(600),
        }
    }

    /// Slower pacing used against the developer API quota.
    pub fn developer() -> Self {
        Self {
            sections: Duration::from_millis(600),
            events: Duration::from_millis(1000),
            attendance: Duration::from_millis(1500),
            members: Duration::from_millis(1200),
        }
    }

    /// No pacing at all (tests).
    pub fn none() -> Self {
        Self {
            sections: Duration::ZERO,
            events: Duration::ZERO,
            attendance: Duration::ZERO,
            members: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, class: EndpointClass) -> Duration {
        match class {
            EndpointClass::Sections => self.sections,
            EndpointClass::Events => self.events,
            EndpointClass::Attendance => self.attendance,
            EndpointClass::Members => self.members,
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote activity-management API
    pub api_base_url: String,
    /// Base URL of the OAuth backend (`/oauth/login` lives here)
    pub backend_base_url: String,
    /// UI origin passed to the OAuth backend as `frontend_url`
    pub frontend_url: String,
    /// Developer mode: slower pacing, faster watchdog, `state=dev`
    pub dev_mode: bool,
    /// Demo mode: prefixed keys, sentinel credential, no HTTP
    pub demo_mode: bool,
    /// SQLite file backing the durable cache
    pub cache_path: String,
    /// Maximum age of cached data served without a refresh
    pub freshness_window: Duration,
    /// Events older than this many days are dropped from the dashboard
    pub event_window_days: i64,
    /// Soft timeout per HTTP request
    pub request_timeout: Duration,
    /// Queue-wide bound on concurrent requests (one per class regardless)
    pub max_parallel_requests: usize,
    /// Pacing override; `None` picks the profile from `dev_mode`
    pub pacing_override: Option<PacingProfile>,
    /// Watchdog override; `None` picks the period from `dev_mode`
    pub watchdog_override: Option<Duration>,
    /// Local facade API port
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:9000".to_string(),
            backend_base_url: "http://localhost:9000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            dev_mode: false,
            demo_mode: false,
            cache_path: "fieldops-cache.sqlite3".to_string(),
            freshness_window: Duration::from_secs(DEFAULT_FRESHNESS_WINDOW_SECS),
            event_window_days: DEFAULT_EVENT_WINDOW_DAYS,
            request_timeout: Duration::from_secs(15),
            max_parallel_requests: 1,
            pacing_override: None,
            watchdog_override: None,
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let api_base_url =
            env::var("API_BASE_URL").map_err(|_| ConfigError::Missing("API_BASE_URL"))?;
        let defaults = Self::default();

        Ok(Self {
            backend_base_url: env::var("BACKEND_BASE_URL").unwrap_or_else(|_| api_base_url.clone()),
            api_base_url,
            frontend_url: env::var("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            dev_mode: parse_flag("SYNC_DEV_MODE")?,
            demo_mode: parse_flag("SYNC_DEMO_MODE")?,
            cache_path: env::var("CACHE_PATH").unwrap_or(defaults.cache_path),
            freshness_window: Duration::from_secs(parse_or(
                "FRESHNESS_WINDOW_SECS",
                DEFAULT_FRESHNESS_WINDOW_SECS,
            )?),
            event_window_days: parse_or("EVENT_WINDOW_DAYS", DEFAULT_EVENT_WINDOW_DAYS)?,
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 15u64)?),
            max_parallel_requests: parse_or("MAX_PARALLEL_REQUESTS", 1usize)?.max(1),
            pacing_override: None,
            watchdog_override: None,
            port: parse_or("PORT", 8080u16)?,
        })
    }

    /// Instant configuration for tests: no pacing, short timeouts.
    pub fn test_default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            pacing_override: Some(PacingProfile::none()),
            watchdog_override: Some(Duration::from_millis(50)),
            ..Self::default()
        }
    }

    /// Same as `test_default`, pointed at a mock API server.
    pub fn for_api(base_url: &str) -> Self {
        Self {
            api_base_url: base_url.to_string(),
            backend_base_url: base_url.to_string(),
            ..Self::test_default()
        }
    }

    pub fn pacing(&self) -> PacingProfile {
        match &self.pacing_override {
            Some(profile) => profile.clone(),
            None if self.dev_mode => PacingProfile::developer(),
            None => PacingProfile::normal(),
        }
    }

    pub fn watchdog_interval(&self) -> Duration {
        match self.watchdog_override {
            Some(period) => period,
            None if self.dev_mode => Duration::from_secs(30),
            None => Duration::from_secs(60),
        }
    }

    pub fn default_token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)
    }

    /// `state` value sent to the OAuth backend.
    pub fn oauth_state(&self) -> &'static str {
        if self.dev_mode {
            "dev"
        } else {
            "prod"
        }
    }
}

fn parse_flag(name: &'static str) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(false),
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid(name, v)),
        },
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, v.clone())),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("API_BASE_URL", "https://api.example.test");
        env::set_var("SYNC_DEV_MODE", "true");
        env::set_var("FRESHNESS_WINDOW_SECS", "600");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.api_base_url, "https://api.example.test");
        assert_eq!(config.backend_base_url, "https://api.example.test");
        assert!(config.dev_mode);
        assert_eq!(config.freshness_window, Duration::from_secs(600));
        assert_eq!(config.pacing(), PacingProfile::developer());
        assert_eq!(config.watchdog_interval(), Duration::from_secs(30));
        assert_eq!(config.oauth_state(), "dev");

        env::remove_var("SYNC_DEV_MODE");
        env::remove_var("FRESHNESS_WINDOW_SECS");
    }

    #[test]
    fn test_default_profile_is_normal() {
        let config = Config::default();
        assert_eq!(config.pacing(), PacingProfile::normal());
        assert_eq!(config.watchdog_interval(), Duration::from_secs(60));
        assert_eq!(config.oauth_state(), "prod");
    }

    #[test]
    fn test_pacing_lookup_by_class() {
        let profile = PacingProfile::normal();
        assert_eq!(
            profile.delay_for(EndpointClass::Attendance),
            Duration::from_millis(800)
        );
        assert_eq!(PacingProfile::none().delay_for(EndpointClass::Events), Duration::ZERO);
    }
}
