use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::rate_limiter::RateLimitConfig;
use crate::services::SlotPolicy;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::{create_security_headers_layer, SecurityHeadersLayer};

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub replica_database_url: Option<String>,
    pub bind_addr: String,
    pub cors_allowed_origins: String,
    pub production: bool,
    pub store_timeout: Duration,
    pub session_ttl: Duration,
    pub main_coordinator_id: String,
    pub main_coordinator_pass_hash: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub user_scan_cap: usize,
    pub slot_policy: SlotPolicy,
    pub max_db_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/rollcall".to_string(),
            replica_database_url: None,
            bind_addr: "0.0.0.0:3001".to_string(),
            cors_allowed_origins: cors::DEFAULT_ALLOWED_ORIGINS.to_string(),
            production: false,
            store_timeout: Duration::from_millis(2500),
            session_ttl: Duration::from_secs(7 * DAY_SECS),
            main_coordinator_id: "admin".to_string(),
            main_coordinator_pass_hash: None,
            rate_limit: RateLimitConfig::default(),
            user_scan_cap: 1000,
            slot_policy: SlotPolicy::default(),
            max_db_connections: 5,
        }
    }
}

impl Config {
    /// Reads the process environment. Unset or unparseable values fall back to
    /// their defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            replica_database_url: optional("REPLICA_DATABASE_URL"),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or(defaults.cors_allowed_origins),
            production: env::var("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            store_timeout: Duration::from_millis(parsed("STORE_TIMEOUT_MS", 2500)),
            session_ttl: Duration::from_secs(parsed::<u64>("SESSION_TTL_DAYS", 7) * DAY_SECS),
            main_coordinator_id: env::var("MAIN_COORDINATOR_ID")
                .unwrap_or(defaults.main_coordinator_id),
            main_coordinator_pass_hash: optional("MAIN_COORDINATOR_PASS_HASH"),
            rate_limit: RateLimitConfig {
                max_attempts: parsed("LOGIN_MAX_ATTEMPTS", defaults.rate_limit.max_attempts),
                window: Duration::from_secs(parsed(
                    "LOGIN_WINDOW_SECS",
                    defaults.rate_limit.window.as_secs(),
                )),
                sweep_interval: Duration::from_secs(parsed(
                    "RATE_LIMIT_SWEEP_SECS",
                    defaults.rate_limit.sweep_interval.as_secs(),
                )),
            },
            user_scan_cap: parsed("USER_SCAN_CAP", defaults.user_scan_cap),
            slot_policy: parsed("SLOT_POLICY", defaults.slot_policy),
            max_db_connections: parsed("MAX_DB_CONNECTIONS", defaults.max_db_connections),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.store_timeout, Duration::from_millis(2500));
        assert_eq!(config.session_ttl, Duration::from_secs(604_800));
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.slot_policy, SlotPolicy::Participants);
        assert!(config.main_coordinator_pass_hash.is_none());
    }

    #[test]
    fn unparseable_values_fall_back() {
        std::env::set_var("ROLLCALL_TEST_NUMBER", "many");
        assert_eq!(parsed("ROLLCALL_TEST_NUMBER", 7u32), 7);
        std::env::set_var("ROLLCALL_TEST_NUMBER", " 12 ");
        assert_eq!(parsed("ROLLCALL_TEST_NUMBER", 7u32), 12);
        std::env::remove_var("ROLLCALL_TEST_NUMBER");
    }
}
