//! Application configuration
//!
//! Values come from the environment (after loading `.env` if present); CLI
//! flags override them in `main`.

use std::str::FromStr;
use std::time::Duration;
use wardline_kv::{ResourceTtls, StoreConfig};

const DEFAULT_SECRET: &str = "default_secret_change_in_production";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Lifetime of issued tokens
    pub token_ttl_hours: i64,
    /// Budget for the primary classifier before falling back to keywords
    pub classifier_timeout: Duration,
    /// Caller-side timeout on system-of-record queries
    pub records_timeout: Duration,
    /// Requests each client address may make per `rate_limit_window`
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub store: StoreConfig,
    pub ttls: ResourceTtls,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: DEFAULT_SECRET.to_string(),
            token_ttl_hours: 24,
            classifier_timeout: Duration::from_millis(2_000),
            records_timeout: Duration::from_millis(5_000),
            rate_limit_max: 100,
            rate_limit_window: Duration::from_secs(15 * 60),
            store: StoreConfig::default(),
            ttls: ResourceTtls::default(),
        }
    }
}

impl AppConfig {
    /// Load from `WARDLINE_HOST`, `WARDLINE_PORT`, `JWT_SECRET`,
    /// `CLASSIFIER_TIMEOUT_MS`, `RECORDS_TIMEOUT_MS`, `RATE_LIMIT_MAX` and
    /// `RATE_LIMIT_WINDOW_SECS`
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            host: std::env::var("WARDLINE_HOST").unwrap_or(defaults.host),
            port: env_parse("WARDLINE_PORT").unwrap_or(defaults.port),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            classifier_timeout: env_parse("CLASSIFIER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.classifier_timeout),
            records_timeout: env_parse("RECORDS_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.records_timeout),
            rate_limit_max: env_parse("RATE_LIMIT_MAX").unwrap_or(defaults.rate_limit_max),
            rate_limit_window: env_parse("RATE_LIMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            ..defaults
        }
    }

    /// Configuration for tests: fixed secret, small store, no retries
    pub fn for_testing(port: u16) -> Self {
        Self {
            port,
            jwt_secret: "test_secret_key_12345".to_string(),
            store: StoreConfig::small(),
            ..Self::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_SECRET
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
